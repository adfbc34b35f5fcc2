//! Vault session and host API for KeepVault.
//!
//! This module provides:
//! - The Locked/Unlocking/Unlocked session holding the decrypted document
//! - Debounced, ordered writes of submitted documents
//! - The async service a host application drives
//!
//! # Architecture
//! The service sits between the host and storage. It serializes all
//! crypto and file work against the vault on blocking threads and never
//! exposes the filesystem to callers.

pub mod service;
pub mod session;
pub mod writer;

pub use service::{ServiceOptions, VaultService};
pub use session::{SessionState, VaultSession};
pub use writer::{SaveEvent, SaveQueue, SaveQueueHandle, DEFAULT_DEBOUNCE};
