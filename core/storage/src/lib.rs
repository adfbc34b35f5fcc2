//! Vault storage for KeepVault.
//!
//! This module provides:
//! - Resolution of the active storage root (portable, configured, default)
//! - The unencrypted pointer file recording a custom storage root
//! - Crash-safe atomic persistence of the encrypted vault file
//! - Timestamped backups with restore and age-based pruning
//!
//! # Design Principles
//! - Exclusive ownership: callers never touch vault files directly
//! - A crash at any point leaves either the old or the new vault intact
//! - Single writer: no cross-process locking is attempted

pub mod atomic;
pub mod backup;
pub mod config;
pub mod manager;
pub mod root;

pub use backup::BackupId;
pub use config::{ConfigRecord, ConfigStore, CONFIG_FILENAME};
pub use manager::{StorageManager, BACKUP_DIRNAME, VAULT_BASENAME, VAULT_FILENAME};
pub use root::{
    default_data_dir, ensure_writable_dir, ConfiguredLocation, PlatformDefault, PortableMarker,
    ResolvedRoot, RootResolver, RootSource, RootStrategy, DEFAULT_APP_NAME, PORTABLE_MARKER,
};
