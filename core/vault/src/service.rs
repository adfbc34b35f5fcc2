//! Async host API over a single vault.
//!
//! [`VaultService`] is what a UI or CLI talks to. It owns the session behind
//! an async mutex and runs every crypto or filesystem step on a blocking
//! thread while holding it, so at most one KDF or encrypt/decrypt runs
//! against the vault at a time and the caller's runtime stays responsive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{info, warn};

use crate::session::{SessionState, VaultSession};
use crate::writer::{SaveEvent, SaveQueue, DEFAULT_DEBOUNCE};
use keepvault_common::{Document, Error, Password, Result};
use keepvault_crypto::{CryptoEngine, KdfParams};
use keepvault_storage::{
    default_data_dir, BackupId, ConfigStore, ResolvedRoot, RootResolver, StorageManager,
    DEFAULT_APP_NAME,
};

/// Service tuning.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Directory name under the platform data directory.
    pub app_name: String,
    /// Quiet period before submitted documents are written.
    pub debounce: Duration,
    /// Replaces the platform default root, which also holds `config.json`.
    pub default_dir: Option<PathBuf>,
    /// KDF parameters for newly written envelopes.
    pub kdf_params: KdfParams,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            debounce: DEFAULT_DEBOUNCE,
            default_dir: None,
            kdf_params: KdfParams::interactive(),
        }
    }
}

/// Host-facing vault API.
pub struct VaultService {
    session: Arc<Mutex<VaultSession>>,
    state: watch::Receiver<SessionState>,
    queue: SaveQueue,
    /// Held shared by `submit` and exclusively by anything that locks.
    submissions: RwLock<()>,
    default_dir: PathBuf,
}

impl VaultService {
    /// Create a service with no active root.
    ///
    /// Must be called inside a tokio runtime; the save queue is spawned
    /// onto it.
    pub fn new(options: ServiceOptions) -> Result<Self> {
        let default_dir = match options.default_dir {
            Some(dir) => dir,
            None => default_data_dir(&options.app_name)?,
        };

        let storage = StorageManager::new(
            CryptoEngine::with_params(options.kdf_params),
            ConfigStore::in_dir(&default_dir),
        );
        let session = VaultSession::new(storage);
        let state = session.subscribe();
        let session = Arc::new(Mutex::new(session));

        let (queue, handle) = SaveQueue::new(options.debounce);
        let worker = session.clone();
        tokio::spawn(handle.run(move |document| {
            let session = worker.clone();
            async move { with_session(session, move |s| s.save_document(document)).await }
        }));

        Ok(Self {
            session,
            state,
            queue,
            submissions: RwLock::new(()),
            default_dir,
        })
    }

    /// Create a service and initialize it at the resolved root.
    ///
    /// # Returns
    /// - The service, whether a vault exists, and the resolution report
    pub async fn open(options: ServiceOptions) -> Result<(Self, bool, ResolvedRoot)> {
        let service = Self::new(options)?;
        let resolved = service.resolve_root().await?;
        for warning in &resolved.warnings {
            warn!(%warning, "Storage location skipped");
        }
        let exists = service.initialize(&resolved.path).await?;
        Ok((service, exists, resolved))
    }

    /// Platform default root, which holds the config file.
    pub fn default_dir(&self) -> &Path {
        &self.default_dir
    }

    /// Run root resolution for the current executable without switching roots.
    pub async fn resolve_root(&self) -> Result<ResolvedRoot> {
        let default_dir = self.default_dir.clone();
        blocking(move || {
            let exe = std::env::current_exe()?;
            RootResolver::standard(exe, default_dir).resolve()
        })
        .await
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut VaultSession) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        with_session(self.session.clone(), f).await
    }

    /// Set the active root, locking the session first.
    ///
    /// # Returns
    /// - `true` if a vault already exists at `root`
    pub async fn initialize(&self, root: impl Into<PathBuf>) -> Result<bool> {
        let root = root.into();
        let _submissions = self.submissions.write().await;
        self.flush().await?;
        self.run(move |s| s.initialize(root)).await
    }

    /// Write a new vault holding an empty document.
    pub async fn create_initial(&self, password: Password) -> Result<()> {
        self.run(move |s| s.create_initial(&password)).await
    }

    /// Unlock the vault and return its document.
    pub async fn unlock(&self, password: Password) -> Result<Document> {
        self.run(move |s| s.unlock(password)).await
    }

    /// Persist pending changes, then wipe the session.
    ///
    /// The session always ends Locked. If the pending changes could not be
    /// written, that error is returned and those changes are lost.
    ///
    /// Waits for a write that is already running, and for any `submit`
    /// that has passed its lock check, so every accepted submission is
    /// written before the session is wiped.
    pub async fn lock(&self) -> Result<()> {
        let _submissions = self.submissions.write().await;
        if let Err(e) = self.queue.flush().await {
            warn!(error = %e, "Pending save failed before lock, retrying");
        }

        self.run(|s| {
            let result = if s.has_unsaved_changes() {
                s.save().map(|_| ())
            } else {
                Ok(())
            };
            s.lock();
            result
        })
        .await
    }

    /// Whether the session is not unlocked.
    ///
    /// Never waits behind an in-flight save.
    pub fn is_locked(&self) -> bool {
        *self.state.borrow() != SessionState::Unlocked
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receive every session state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Receive the outcome of every debounced write.
    pub fn subscribe_saves(&self) -> broadcast::Receiver<SaveEvent> {
        self.queue.subscribe()
    }

    /// Persist `document` now, after checking `password` against the session.
    ///
    /// Pending submissions are written first so writes land in order.
    ///
    /// # Errors
    /// - `Locked` if the session is locked
    /// - `AuthenticationFailed` if `password` is not the session password
    pub async fn save(&self, password: Password, document: Document) -> Result<()> {
        self.flush().await?;
        self.run(move |s| s.save_with_password(&password, document))
            .await
            .map(|_| ())
    }

    /// Queue `document` for a debounced write.
    ///
    /// Only the latest document submitted within the debounce window is
    /// written. A submission that returns `Ok` is written before any later
    /// `lock` completes.
    ///
    /// # Errors
    /// - `Locked` if the session is locked, including when a `lock` won
    ///   the race with this call
    pub async fn submit(&self, document: Document) -> Result<()> {
        let _submissions = self.submissions.read().await;
        if self.is_locked() {
            return Err(Error::Locked);
        }
        self.queue.submit(document).await
    }

    /// Write the pending submission now.
    pub async fn flush(&self) -> Result<()> {
        self.queue.flush().await
    }

    /// The session document.
    ///
    /// Submissions still waiting in the debounce window are not included.
    pub async fn get_data(&self) -> Result<Document> {
        self.run(|s| s.document().cloned()).await
    }

    /// Backups at the active root, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupId>> {
        self.run(|s| s.list_backups()).await
    }

    /// Restore a backup; the session ends Locked.
    pub async fn restore_backup(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        let _submissions = self.submissions.write().await;
        self.flush().await?;
        self.run(move |s| s.restore_backup(&id)).await
    }

    /// Delete backups older than `retention_days`, keeping the newest.
    pub async fn prune_backups(&self, retention_days: u32) -> Result<Vec<BackupId>> {
        self.run(move |s| s.prune_backups(retention_days)).await
    }

    /// Re-encrypt the vault under a new password.
    pub async fn change_password(&self, old: Password, new: Password) -> Result<()> {
        self.flush().await?;
        self.run(move |s| s.change_password(&old, new)).await
    }

    /// Active storage root.
    pub async fn get_data_location(&self) -> Result<PathBuf> {
        self.run(|s| s.data_location().map(Path::to_path_buf)).await
    }

    /// Copy the vault and backups to `path` and make it the active root.
    ///
    /// The previous root keeps its files.
    pub async fn set_data_location(&self, path: impl Into<PathBuf>) -> Result<PathBuf> {
        let path = path.into();
        self.flush().await?;
        self.run(move |s| s.set_data_location(&path)).await
    }

    /// Write pending changes, stop the save queue and lock.
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.lock().await;
        self.queue.shutdown().await;
        info!("Vault service stopped");
        result
    }
}

/// Run `f` on a blocking thread while holding the session.
async fn with_session<T, F>(session: Arc<Mutex<VaultSession>>, f: F) -> Result<T>
where
    F: FnOnce(&mut VaultSession) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    blocking(move || {
        let mut guard = session.blocking_lock();
        f(&mut *guard)
    })
    .await
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Vault(format!("Vault task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepvault_common::Site;
    use keepvault_storage::{RootSource, BACKUP_DIRNAME, VAULT_FILENAME};
    use std::fs;
    use tempfile::TempDir;

    fn options(temp: &TempDir, debounce: Duration) -> ServiceOptions {
        ServiceOptions {
            debounce,
            default_dir: Some(temp.path().join("appdata")),
            kdf_params: KdfParams::insecure_fast(),
            ..ServiceOptions::default()
        }
    }

    async fn service(temp: &TempDir, debounce: Duration) -> VaultService {
        let service = VaultService::new(options(temp, debounce)).unwrap();
        assert!(!service.initialize(temp.path().join("root")).await.unwrap());
        service
    }

    fn named(name: &str) -> Document {
        let mut doc = Document::new();
        doc.sites.push(Site::new("site", name));
        doc
    }

    #[tokio::test]
    async fn test_create_and_unlock() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, DEFAULT_DEBOUNCE).await;

        service.create_initial(Password::new("Secret123!")).await.unwrap();
        assert!(service.is_locked());

        let doc = service.unlock(Password::new("Secret123!")).await.unwrap();
        assert_eq!(doc, Document::new());
        assert!(!service.is_locked());
        assert_eq!(service.get_data().await.unwrap(), Document::new());

        service.lock().await.unwrap();
        assert!(matches!(
            service.unlock(Password::new("WrongPass")).await,
            Err(Error::AuthenticationFailed)
        ));
        assert!(service.is_locked());
        assert!(matches!(service.get_data().await, Err(Error::Locked)));
    }

    #[tokio::test]
    async fn test_debounced_submissions_write_once() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, Duration::from_millis(100)).await;
        service.create_initial(Password::new("pw")).await.unwrap();
        service.unlock(Password::new("pw")).await.unwrap();
        let mut saves = service.subscribe_saves();

        service.submit(named("first")).await.unwrap();
        service.submit(named("second")).await.unwrap();

        assert!(matches!(saves.recv().await.unwrap(), SaveEvent::Saved { .. }));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(saves.try_recv().is_err());

        // One physical write, so exactly one backup of the initial vault.
        assert_eq!(service.list_backups().await.unwrap().len(), 1);
        assert_eq!(service.get_data().await.unwrap(), named("second"));

        service.lock().await.unwrap();
        assert_eq!(
            service.unlock(Password::new("pw")).await.unwrap(),
            named("second")
        );
    }

    #[tokio::test]
    async fn test_lock_writes_pending_submission() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, Duration::from_secs(60)).await;
        service.create_initial(Password::new("pw")).await.unwrap();
        service.unlock(Password::new("pw")).await.unwrap();

        service.submit(named("unsaved")).await.unwrap();
        service.lock().await.unwrap();
        assert!(service.is_locked());

        assert_eq!(
            service.unlock(Password::new("pw")).await.unwrap(),
            named("unsaved")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lock_waits_for_running_write() {
        let temp = TempDir::new().unwrap();
        // Costly enough that the write is still running when lock is called.
        let options = ServiceOptions {
            kdf_params: KdfParams {
                memory: 32 * 1024,
                iterations: 4,
                parallelism: 1,
            },
            ..options(&temp, Duration::from_millis(5))
        };
        let service = VaultService::new(options).unwrap();
        service.initialize(temp.path().join("root")).await.unwrap();
        service.create_initial(Password::new("pw")).await.unwrap();
        service.unlock(Password::new("pw")).await.unwrap();
        let mut saves = service.subscribe_saves();

        service.submit(named("in-flight")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        service.lock().await.unwrap();

        assert!(service.is_locked());
        assert!(matches!(saves.try_recv(), Ok(SaveEvent::Saved { .. })));
        assert_eq!(
            service.unlock(Password::new("pw")).await.unwrap(),
            named("in-flight")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_submit_racing_lock_is_written_or_rejected() {
        let temp = TempDir::new().unwrap();
        let service = Arc::new(service(&temp, Duration::from_millis(1)).await);
        service.create_initial(Password::new("pw")).await.unwrap();
        service.unlock(Password::new("pw")).await.unwrap();
        let mut saves = service.subscribe_saves();

        let submitters: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    let name = format!("doc-{}", i);
                    service.submit(named(&name)).await.map(|_| name)
                })
            })
            .collect();
        service.lock().await.unwrap();

        let mut accepted = Vec::new();
        for task in submitters {
            match task.await.unwrap() {
                Ok(name) => accepted.push(name),
                Err(e) => assert!(matches!(e, Error::Locked), "unexpected {:?}", e),
            }
        }
        assert!(service.is_locked());

        // Nothing accepted may be left behind to fail against a locked session.
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = saves.try_recv() {
            assert!(matches!(event, SaveEvent::Saved { .. }), "{:?}", event);
        }

        let doc = service.unlock(Password::new("pw")).await.unwrap();
        if accepted.is_empty() {
            assert_eq!(doc, Document::new());
        } else {
            assert!(accepted.iter().any(|name| named(name) == doc));
        }
    }

    #[tokio::test]
    async fn test_submit_after_lock_is_rejected() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, DEFAULT_DEBOUNCE).await;
        service.create_initial(Password::new("pw")).await.unwrap();
        service.unlock(Password::new("pw")).await.unwrap();
        service.lock().await.unwrap();

        assert!(matches!(
            service.submit(named("late")).await,
            Err(Error::Locked)
        ));
        service.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_requires_unlock() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, DEFAULT_DEBOUNCE).await;

        assert!(matches!(
            service.submit(named("x")).await,
            Err(Error::Locked)
        ));
    }

    #[tokio::test]
    async fn test_explicit_save_checks_password() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, DEFAULT_DEBOUNCE).await;
        service.create_initial(Password::new("pw")).await.unwrap();
        service.unlock(Password::new("pw")).await.unwrap();

        assert!(matches!(
            service.save(Password::new("other"), named("x")).await,
            Err(Error::AuthenticationFailed)
        ));
        service.save(Password::new("pw"), named("kept")).await.unwrap();
        assert_eq!(service.get_data().await.unwrap(), named("kept"));
    }

    #[tokio::test]
    async fn test_change_password_scenario() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, DEFAULT_DEBOUNCE).await;
        service.create_initial(Password::new("Secret123!")).await.unwrap();
        service.unlock(Password::new("Secret123!")).await.unwrap();

        service
            .change_password(Password::new("Secret123!"), Password::new("NewPass456!"))
            .await
            .unwrap();
        service.lock().await.unwrap();

        assert!(service.unlock(Password::new("NewPass456!")).await.is_ok());
        service.lock().await.unwrap();
        assert!(matches!(
            service.unlock(Password::new("Secret123!")).await,
            Err(Error::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_restore_backup_locks() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, DEFAULT_DEBOUNCE).await;
        service.create_initial(Password::new("pw")).await.unwrap();
        service.unlock(Password::new("pw")).await.unwrap();
        service.save(Password::new("pw"), named("later")).await.unwrap();

        let backups = service.list_backups().await.unwrap();
        service.restore_backup(backups[0].as_str()).await.unwrap();
        assert!(service.is_locked());
        assert_eq!(
            service.unlock(Password::new("pw")).await.unwrap(),
            Document::new()
        );

        assert!(matches!(
            service.restore_backup("vault-20000101T000000.000000Z.encrypted").await,
            Err(Error::BackupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_data_location() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, DEFAULT_DEBOUNCE).await;
        service.create_initial(Password::new("pw")).await.unwrap();
        service.unlock(Password::new("pw")).await.unwrap();
        service.save(Password::new("pw"), named("moved")).await.unwrap();

        let old_root = service.get_data_location().await.unwrap();
        let backup = service.list_backups().await.unwrap().remove(0);
        let target = temp.path().join("usb");
        fs::create_dir_all(&target).unwrap();

        let new_root = service.set_data_location(&target).await.unwrap();
        assert_eq!(service.get_data_location().await.unwrap(), new_root);

        for root in [&old_root, &new_root] {
            assert!(root.join(VAULT_FILENAME).is_file());
            assert!(root.join(BACKUP_DIRNAME).join(backup.as_str()).is_file());
        }

        // The next start picks the configured location.
        let resolved = service.resolve_root().await.unwrap();
        assert_eq!(resolved.source, RootSource::Configured);
        assert_eq!(resolved.path, new_root);
    }

    #[tokio::test]
    async fn test_open_uses_default_root() {
        let temp = TempDir::new().unwrap();
        let (service, exists, resolved) =
            VaultService::open(options(&temp, DEFAULT_DEBOUNCE)).await.unwrap();

        assert!(!exists);
        assert_eq!(resolved.source, RootSource::Default);
        assert_eq!(
            service.get_data_location().await.unwrap(),
            temp.path().join("appdata")
        );
        service.shutdown().await.unwrap();
    }
}
