//! Write-temp-then-rename file replacement.
//!
//! A [`StagedFile`] is fully written and synced next to its target before
//! anything at the target path changes. Committing renames it over the
//! target in one step; dropping it uncommitted removes the temp file.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use keepvault_common::{Error, Result};

/// Suffix appended to the target file name for the temp file.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Temp path used when staging a write to `target`.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("staged"));
    name.push(TEMP_SUFFIX);
    target.with_file_name(name)
}

/// A fully written temp file waiting to replace its target.
#[derive(Debug)]
pub struct StagedFile {
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Write `data` to a temp file in the target's directory and sync it.
    ///
    /// # Postconditions
    /// - The target path is untouched
    /// - The temp file holds exactly `data`, flushed to disk
    ///
    /// # Errors
    /// - I/O errors creating, writing or syncing the temp file. The temp
    ///   file is removed on failure.
    pub fn write(target: &Path, data: &[u8]) -> Result<Self> {
        let staged = Self {
            temp: temp_path_for(target),
            target: target.to_path_buf(),
            committed: false,
        };

        let mut file = File::create(&staged.temp)?;
        file.write_all(data)?;
        file.sync_all()?;

        debug!(path = %staged.temp.display(), bytes = data.len(), "Staged file written");
        Ok(staged)
    }

    /// Stage a copy of an existing file.
    pub fn copy_from(source: &Path, target: &Path) -> Result<Self> {
        let staged = Self {
            temp: temp_path_for(target),
            target: target.to_path_buf(),
            committed: false,
        };

        fs::copy(source, &staged.temp)?;
        File::open(&staged.temp)?.sync_all()?;
        Ok(staged)
    }

    /// Path of the temp file.
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Path the temp file will replace.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically replace the target with the staged content.
    ///
    /// # Errors
    /// - I/O errors from the rename; the target keeps its previous content
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.temp, &self.target)?;
        self.committed = true;
        sync_parent_dir(&self.target);

        debug!(path = %self.target.display(), "Staged file committed");
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed && self.temp.exists() {
            if let Err(e) = fs::remove_file(&self.temp) {
                warn!(path = %self.temp.display(), error = %e, "Failed to remove temp file");
            }
        }
    }
}

/// Replace `target` with `data` atomically.
pub fn write_atomic(target: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Parent directory not found: {}", parent.display()),
            )));
        }
    }
    StagedFile::write(target, data)?.commit()
}

/// Persist the rename itself where the platform allows it.
fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
                debug!(path = %parent.display(), error = %e, "Directory sync skipped");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
