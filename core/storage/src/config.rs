//! Unencrypted pointer file for a user-chosen storage root.
//!
//! The record has to be readable before any password is known, so it is
//! plain JSON beside the platform default root. It never holds secrets.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::atomic::write_atomic;
use keepvault_common::{Error, Result};

/// Configuration file name in the default root.
pub const CONFIG_FILENAME: &str = "config.json";

/// Persistent storage-location override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    /// Custom storage root, if the user moved the data.
    #[serde(default)]
    pub custom_data_location: Option<PathBuf>,
}

/// Reads and writes the [`ConfigRecord`] file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store keeping `config.json` in `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::at(dir.as_ref().join(CONFIG_FILENAME))
    }

    /// Store at an explicit file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record.
    ///
    /// # Returns
    /// - `Ok(None)` if no config file exists yet
    ///
    /// # Errors
    /// - `Serialization` if the file exists but is not a valid record
    /// - I/O errors reading the file
    pub fn load(&self) -> Result<Option<ConfigRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read(&self.path)?;
        let record = serde_json::from_slice(&content).map_err(|e| {
            Error::Serialization(format!("Invalid config {}: {}", self.path.display(), e))
        })?;
        Ok(Some(record))
    }

    /// Write the record, creating the parent directory if needed.
    pub fn save(&self, record: &ConfigRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.path, &json)?;

        debug!(path = %self.path.display(), "Saved storage config");
        Ok(())
    }

    /// Update only the custom storage location.
    pub fn set_custom_data_location(&self, location: Option<PathBuf>) -> Result<()> {
        let mut record = self.load()?.unwrap_or_default();
        record.custom_data_location = location;
        self.save(&record)
    }

    /// Read the custom storage location, if one is recorded.
    pub fn custom_data_location(&self) -> Result<Option<PathBuf>> {
        Ok(self.load()?.and_then(|r| r.custom_data_location))
    }
}
