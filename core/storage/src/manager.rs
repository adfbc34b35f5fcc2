//! Vault file and backup management for one storage root.
//!
//! All filesystem access to the vault, its backups and the storage config
//! goes through [`StorageManager`]. Writes follow one protocol:
//!
//! 1. Encrypt and stage the new envelope as `<vault>.tmp`, fully synced.
//! 2. Copy the current vault into `backups/` under a timestamped name.
//! 3. Rename the staged file over the live vault.
//!
//! A failure before step 3 leaves the previous vault byte-for-byte intact.

use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::atomic::{temp_path_for, write_atomic, StagedFile};
use crate::backup::{self, BackupId};
use crate::config::ConfigStore;
use crate::root::ensure_writable_dir;
use keepvault_common::{Document, Error, Password, Result};
use keepvault_crypto::{CryptoEngine, VaultEnvelope};

/// Base name shared by the vault file and its backups.
pub const VAULT_BASENAME: &str = "vault";

/// Live vault file name under the storage root.
pub const VAULT_FILENAME: &str = "vault.encrypted";

/// Backup directory name under the storage root.
pub const BACKUP_DIRNAME: &str = "backups";

/// Owns the vault file, the backups directory and the config record.
#[derive(Debug, Clone)]
pub struct StorageManager {
    root: Option<PathBuf>,
    engine: CryptoEngine,
    config: ConfigStore,
}

impl StorageManager {
    /// Create a manager with no active root.
    ///
    /// `config` is the store that [`StorageManager::set_location`] updates.
    pub fn new(engine: CryptoEngine, config: ConfigStore) -> Self {
        Self {
            root: None,
            engine,
            config,
        }
    }

    /// Set the active storage root.
    ///
    /// Creates the root and backup directories if needed and removes a temp
    /// file left by an interrupted save.
    ///
    /// # Returns
    /// - `true` if a vault file already exists at the root
    pub fn initialize(&mut self, root: impl Into<PathBuf>) -> Result<bool> {
        let root = root.into();
        fs::create_dir_all(root.join(BACKUP_DIRNAME))?;

        let stale = temp_path_for(&root.join(VAULT_FILENAME));
        if stale.exists() {
            warn!(path = %stale.display(), "Removing temp file from interrupted save");
            fs::remove_file(&stale)?;
        }

        let exists = root.join(VAULT_FILENAME).is_file();
        info!(root = %root.display(), vault_exists = exists, "Storage initialized");
        self.root = Some(root);
        Ok(exists)
    }

    /// Active storage root.
    ///
    /// # Errors
    /// - `NotInitialized` before [`StorageManager::initialize`]
    pub fn data_location(&self) -> Result<&Path> {
        self.root.as_deref().ok_or(Error::NotInitialized)
    }

    /// Store that records custom storage locations.
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Crypto engine used for new envelopes.
    pub fn engine(&self) -> &CryptoEngine {
        &self.engine
    }

    /// Path of the live vault file.
    pub fn vault_path(&self) -> Result<PathBuf> {
        Ok(self.data_location()?.join(VAULT_FILENAME))
    }

    /// Path of the backups directory.
    pub fn backups_dir(&self) -> Result<PathBuf> {
        Ok(self.data_location()?.join(BACKUP_DIRNAME))
    }

    /// Whether a vault file exists at the active root.
    pub fn vault_exists(&self) -> Result<bool> {
        Ok(self.vault_path()?.is_file())
    }

    /// Write a brand-new vault.
    ///
    /// # Errors
    /// - `AlreadyExists` if a vault file is already present
    pub fn create_initial(&self, password: &Password, document: &Document) -> Result<()> {
        let vault = self.vault_path()?;
        if vault.exists() {
            return Err(Error::AlreadyExists(vault.display().to_string()));
        }

        let envelope = self.encrypt(password, document)?;
        write_atomic(&vault, &envelope.to_bytes()?)?;

        info!(path = %vault.display(), "Created vault");
        Ok(())
    }

    /// Load and decrypt the live vault.
    ///
    /// # Errors
    /// - `MalformedEnvelope` if the file is not a supported envelope
    /// - `AuthenticationFailed` on a wrong password or tampered file
    pub fn read(&self, password: &Password) -> Result<Document> {
        let vault = self.vault_path()?;
        let bytes = fs::read(&vault)?;
        let envelope = VaultEnvelope::from_bytes(&bytes)?;

        let plaintext = self.engine.decrypt(&envelope, password)?;
        let document = Document::from_plaintext(&plaintext)?;

        debug!(path = %vault.display(), sites = document.sites.len(), "Read vault");
        Ok(document)
    }

    /// Persist `document` under `password`, backing up the previous vault.
    ///
    /// # Returns
    /// - The backup taken of the previous vault, if there was one
    pub fn save(&self, password: &Password, document: &Document) -> Result<Option<BackupId>> {
        let staged = self.stage(password, document)?;
        let backup = self.backup_current()?;
        staged.commit()?;

        debug!(backup = ?backup.as_ref().map(BackupId::as_str), "Saved vault");
        Ok(backup)
    }

    /// Encrypt `document` into the temp file without touching the live vault.
    fn stage(&self, password: &Password, document: &Document) -> Result<StagedFile> {
        let envelope = self.encrypt(password, document)?;
        StagedFile::write(&self.vault_path()?, &envelope.to_bytes()?)
    }

    fn encrypt(&self, password: &Password, document: &Document) -> Result<VaultEnvelope> {
        let plaintext = document.to_plaintext()?;
        self.engine.encrypt(plaintext.as_bytes(), password)
    }

    /// Copy the live vault into the backups directory.
    fn backup_current(&self) -> Result<Option<BackupId>> {
        let vault = self.vault_path()?;
        if !vault.is_file() {
            return Ok(None);
        }

        let dir = self.backups_dir()?;
        fs::create_dir_all(&dir)?;

        let mut captured_at = Utc::now();
        let mut id = BackupId::new(VAULT_BASENAME, captured_at);
        while dir.join(id.as_str()).exists() {
            captured_at += Duration::microseconds(1);
            id = BackupId::new(VAULT_BASENAME, captured_at);
        }

        StagedFile::copy_from(&vault, &dir.join(id.as_str()))?.commit()?;
        debug!(backup = %id, "Backed up vault");
        Ok(Some(id))
    }

    /// Backups at the active root, newest first.
    ///
    /// Files not following the backup naming scheme are ignored.
    pub fn list_backups(&self) -> Result<Vec<BackupId>> {
        let dir = self.backups_dir()?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match BackupId::parse(VAULT_BASENAME, name) {
                Ok(id) => backups.push(id),
                Err(_) => debug!(name, "Skipping foreign file in backups"),
            }
        }

        backups.sort_by(|a, b| b.cmp(a));
        Ok(backups)
    }

    /// Put a backup's content back into the live vault position.
    ///
    /// The current vault is backed up first. The restored content is not
    /// decrypted here; the next [`StorageManager::read`] proves it.
    ///
    /// # Errors
    /// - `InvalidInput` if `id` is not a backup name
    /// - `BackupNotFound` if no such backup exists
    pub fn restore_backup(&self, id: &str) -> Result<()> {
        let id = BackupId::parse(VAULT_BASENAME, id)?;
        let source = self.backups_dir()?.join(id.as_str());
        if !source.is_file() {
            return Err(Error::BackupNotFound(id.to_string()));
        }

        let staged = StagedFile::copy_from(&source, &self.vault_path()?)?;
        self.backup_current()?;
        staged.commit()?;

        info!(backup = %id, "Restored backup");
        Ok(())
    }

    /// Delete backups older than `retention_days`, keeping the newest.
    ///
    /// # Returns
    /// - The removed backups
    pub fn prune_backups(&self, retention_days: u32) -> Result<Vec<BackupId>> {
        self.prune_backups_at(Utc::now(), retention_days)
    }

    /// [`StorageManager::prune_backups`] against an explicit clock.
    pub fn prune_backups_at(
        &self,
        now: DateTime<Utc>,
        retention_days: u32,
    ) -> Result<Vec<BackupId>> {
        let dir = self.backups_dir()?;
        let removed = backup::expired(&self.list_backups()?, now, retention_days);

        for id in &removed {
            fs::remove_file(dir.join(id.as_str()))?;
        }

        if !removed.is_empty() {
            info!(count = removed.len(), retention_days, "Pruned backups");
        }
        Ok(removed)
    }

    /// Copy the vault and its backups to `new_root` and make it active.
    ///
    /// The old root keeps its files. The config record is updated so the
    /// new root is picked at next startup.
    ///
    /// # Errors
    /// - `LocationUnavailable` if `new_root` is missing, not a directory or
    ///   not writable
    /// - `InvalidInput` if `new_root` is the current root
    pub fn set_location(&mut self, new_root: &Path) -> Result<PathBuf> {
        let old_root = self.data_location()?.to_path_buf();

        ensure_writable_dir(new_root)?;
        let new_root = new_root.canonicalize()?;
        let old_canonical = old_root.canonicalize().unwrap_or_else(|_| old_root.clone());
        if new_root == old_canonical {
            return Err(Error::InvalidInput(format!(
                "{} is already the storage location",
                new_root.display()
            )));
        }

        let old_vault = old_root.join(VAULT_FILENAME);
        if old_vault.is_file() {
            StagedFile::copy_from(&old_vault, &new_root.join(VAULT_FILENAME))?.commit()?;
        }

        let new_backups = new_root.join(BACKUP_DIRNAME);
        fs::create_dir_all(&new_backups)?;
        let backups = self.list_backups()?;
        for id in &backups {
            let target = new_backups.join(id.as_str());
            if !target.exists() {
                StagedFile::copy_from(&old_root.join(BACKUP_DIRNAME).join(id.as_str()), &target)?
                    .commit()?;
            }
        }

        self.config.set_custom_data_location(Some(new_root.clone()))?;
        info!(
            from = %old_root.display(),
            to = %new_root.display(),
            backups = backups.len(),
            "Storage location changed"
        );

        self.root = Some(new_root.clone());
        Ok(new_root)
    }
}
