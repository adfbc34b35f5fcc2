//! Vault session management.
//!
//! The session is the only holder of the decrypted document and the
//! password it was unlocked with. Both exist between `unlock` and `lock`;
//! `lock` overwrites them in memory before releasing them.

use tokio::sync::watch;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use keepvault_common::{Document, Error, Password, Result};
use keepvault_storage::{BackupId, StorageManager};
use std::path::{Path, PathBuf};

/// State of the vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No password or document in memory.
    Locked,
    /// Key derivation and decryption in progress.
    Unlocking,
    /// Password and document are held in memory.
    Unlocked,
}

/// Secrets held while unlocked.
struct Unlocked {
    password: Password,
    document: Document,
    dirty: bool,
}

impl Drop for Unlocked {
    fn drop(&mut self) {
        // Password wipes itself on drop.
        self.document.zeroize();
    }
}

/// Locked/unlocked lifecycle over one [`StorageManager`].
///
/// Every operation here performs blocking crypto and file I/O; async
/// callers run them on a blocking thread.
pub struct VaultSession {
    storage: StorageManager,
    unlocked: Option<Unlocked>,
    state: watch::Sender<SessionState>,
}

impl VaultSession {
    /// Create a locked session.
    pub fn new(storage: StorageManager) -> Self {
        let (state, _) = watch::channel(SessionState::Locked);
        Self {
            storage,
            unlocked: None,
            state,
        }
    }

    /// Underlying storage manager.
    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receive every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Check if the session is locked.
    pub fn is_locked(&self) -> bool {
        self.unlocked.is_none()
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// Lock and point storage at `root`.
    ///
    /// # Returns
    /// - `true` if a vault already exists at `root`
    ///
    /// # Errors
    /// - `Vault` if the session holds unsaved changes; the session and its
    ///   root are left as they were
    pub fn initialize(&mut self, root: impl Into<PathBuf>) -> Result<bool> {
        if self.has_unsaved_changes() {
            return Err(Error::Vault(
                "Unsaved changes must be saved before switching roots".to_string(),
            ));
        }
        self.lock();
        self.storage.initialize(root)
    }

    /// Write a new vault holding an empty document.
    ///
    /// The session stays locked; unlock it with the same password.
    ///
    /// # Errors
    /// - `InvalidInput` if the password is empty
    /// - `AlreadyExists` if a vault already exists
    pub fn create_initial(&self, password: &Password) -> Result<()> {
        if password.is_empty() {
            return Err(Error::InvalidInput("Password must not be empty".to_string()));
        }
        self.storage.create_initial(password, &Document::new())
    }

    /// Decrypt the vault and hold its document in memory.
    ///
    /// Unlocking an unlocked session only checks the password and returns
    /// the in-memory document.
    ///
    /// # Postconditions
    /// - On success the state is Unlocked
    /// - On any failure the state is Locked
    ///
    /// # Errors
    /// - `AuthenticationFailed` on a wrong password or tampered vault
    /// - `MalformedEnvelope` or I/O errors reading the vault
    pub fn unlock(&mut self, password: Password) -> Result<Document> {
        if let Some(unlocked) = &self.unlocked {
            if !unlocked.password.matches(&password) {
                return Err(Error::AuthenticationFailed);
            }
            return Ok(unlocked.document.clone());
        }

        self.set_state(SessionState::Unlocking);
        match self.storage.read(&password) {
            Ok(document) => {
                let snapshot = document.clone();
                self.unlocked = Some(Unlocked {
                    password,
                    document,
                    dirty: false,
                });
                self.set_state(SessionState::Unlocked);
                info!("Vault unlocked");
                Ok(snapshot)
            }
            Err(e) => {
                self.set_state(SessionState::Locked);
                debug!(error = %e, "Unlock failed");
                Err(e)
            }
        }
    }

    /// Wipe the password and document from memory.
    ///
    /// Unsaved changes are discarded; callers flush first.
    ///
    /// # Returns
    /// - `true` if the session was unlocked
    pub fn lock(&mut self) -> bool {
        let was_unlocked = match self.unlocked.take() {
            Some(unlocked) => {
                if unlocked.dirty {
                    warn!("Locking with unsaved changes");
                }
                drop(unlocked);
                true
            }
            None => false,
        };

        self.set_state(SessionState::Locked);
        if was_unlocked {
            info!("Vault locked");
        }
        was_unlocked
    }

    fn unlocked(&self) -> Result<&Unlocked> {
        self.unlocked.as_ref().ok_or(Error::Locked)
    }

    fn unlocked_mut(&mut self) -> Result<&mut Unlocked> {
        self.unlocked.as_mut().ok_or(Error::Locked)
    }

    /// The in-memory document, including unsaved changes.
    pub fn document(&self) -> Result<&Document> {
        Ok(&self.unlocked()?.document)
    }

    /// Whether the in-memory document differs from the vault file.
    pub fn has_unsaved_changes(&self) -> bool {
        self.unlocked.as_ref().is_some_and(|u| u.dirty)
    }

    /// Replace the in-memory document without persisting it.
    pub fn mutate(&mut self, document: Document) -> Result<()> {
        let unlocked = self.unlocked_mut()?;
        unlocked.document = document;
        unlocked.dirty = true;
        Ok(())
    }

    /// Persist the in-memory document under the session password.
    ///
    /// When the document enables automatic backups, backups older than its
    /// retention window are pruned afterwards; a pruning failure is logged
    /// and does not fail the save.
    ///
    /// # Postconditions
    /// - On failure the unsaved document stays in memory and the vault
    ///   file is unchanged
    ///
    /// # Errors
    /// - `Locked` if the session is locked
    pub fn save(&mut self) -> Result<Option<BackupId>> {
        let unlocked = self.unlocked()?;
        let backup = self.storage.save(&unlocked.password, &unlocked.document)?;
        let settings = unlocked.document.settings.clone();

        self.unlocked_mut()?.dirty = false;

        if settings.auto_backup {
            if let Err(e) = self.storage.prune_backups(settings.backup_keep_days) {
                warn!(error = %e, "Backup pruning failed");
            }
        }
        Ok(backup)
    }

    /// Replace the document and persist it.
    pub fn save_document(&mut self, document: Document) -> Result<Option<BackupId>> {
        self.mutate(document)?;
        self.save()
    }

    /// Persist `document` after checking `password` against the session.
    ///
    /// # Errors
    /// - `AuthenticationFailed` if `password` is not the session password
    pub fn save_with_password(
        &mut self,
        password: &Password,
        document: Document,
    ) -> Result<Option<BackupId>> {
        if !self.unlocked()?.password.matches(password) {
            return Err(Error::AuthenticationFailed);
        }
        self.save_document(document)
    }

    /// Re-encrypt the document under a new password.
    ///
    /// # Preconditions
    /// - Session must be unlocked
    ///
    /// # Postconditions
    /// - The session password changes only once the re-encrypted vault has
    ///   been written
    ///
    /// # Errors
    /// - `AuthenticationFailed` if `old` does not decrypt the vault
    /// - `InvalidInput` if `new` is empty
    pub fn change_password(&mut self, old: &Password, new: Password) -> Result<()> {
        let unlocked = self.unlocked()?;
        if new.is_empty() {
            return Err(Error::InvalidInput("New password must not be empty".to_string()));
        }

        // Trial decrypt; the result is only needed for the check.
        let mut current = self.storage.read(old)?;
        current.zeroize();

        self.storage.save(&new, &unlocked.document)?;

        let unlocked = self.unlocked_mut()?;
        unlocked.password = new;
        unlocked.dirty = false;
        info!("Vault password changed");
        Ok(())
    }

    /// Backups at the active root, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupId>> {
        self.storage.list_backups()
    }

    /// Restore a backup and lock the session.
    ///
    /// The restored vault is only proven by the next unlock.
    pub fn restore_backup(&mut self, id: &str) -> Result<()> {
        self.storage.restore_backup(id)?;
        self.lock();
        Ok(())
    }

    /// Delete backups older than `retention_days`, keeping the newest.
    pub fn prune_backups(&self, retention_days: u32) -> Result<Vec<BackupId>> {
        self.storage.prune_backups(retention_days)
    }

    /// Active storage root.
    pub fn data_location(&self) -> Result<&Path> {
        self.storage.data_location()
    }

    /// Copy the vault to `new_root` and make it the active root.
    pub fn set_data_location(&mut self, new_root: &Path) -> Result<PathBuf> {
        self.storage.set_location(new_root)
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        self.lock();
    }
}
