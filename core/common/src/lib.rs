//! Common utilities and types shared across KeepVault modules.
//!
//! This module provides foundational types that are used throughout the codebase,
//! ensuring consistency and type safety.

pub mod document;
pub mod error;
pub mod types;

pub use document::{
    ChecklistItem, Contact, Document, Extra, Intervention, MetadataField, Settings, Site,
};
pub use error::{Error, Result};
pub use types::{Password, SensitiveBytes};
