//! Debounced vault writes.
//!
//! Mutations are submitted as whole documents. The queue keeps only the
//! latest one and writes it once no new submission has arrived for the
//! debounce window. Submissions arriving while a write is running wait in
//! the channel and start a fresh window once it completes.

use std::future::Future;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};
use zeroize::Zeroize;

use keepvault_common::{Document, Error, Result};
use keepvault_storage::BackupId;

/// Default quiet period before a submitted document is written.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Outcome of a physical write, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveEvent {
    /// The document was written; holds the backup of the previous vault.
    Saved { backup: Option<BackupId> },
    /// The write failed; the vault file is unchanged.
    Failed { error: String },
}

enum Command {
    Submit(Document),
    Flush(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<()>),
}

/// Client side of the save queue.
#[derive(Clone)]
pub struct SaveQueue {
    command_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<SaveEvent>,
}

impl SaveQueue {
    /// Create a queue and the handle that runs it.
    pub fn new(debounce: Duration) -> (Self, SaveQueueHandle) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (events, _) = broadcast::channel(16);

        let queue = Self {
            command_tx,
            events: events.clone(),
        };
        let handle = SaveQueueHandle {
            command_rx,
            events,
            debounce,
        };
        (queue, handle)
    }

    /// Replace the pending document and restart the debounce window.
    pub async fn submit(&self, document: Document) -> Result<()> {
        self.command_tx
            .send(Command::Submit(document))
            .await
            .map_err(|_| Error::Vault("Save queue not running".to_string()))
    }

    /// Write the pending document now.
    ///
    /// # Returns
    /// - `Ok(())` if nothing was pending or the write succeeded
    pub async fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Flush(reply_tx))
            .await
            .map_err(|_| Error::Vault("Save queue not running".to_string()))?;

        reply_rx
            .await
            .map_err(|_| Error::Vault("Save queue dropped flush request".to_string()))?
    }

    /// Write anything pending and stop the queue.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.command_tx.send(Command::Shutdown(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Receive the outcome of every physical write.
    pub fn subscribe(&self) -> broadcast::Receiver<SaveEvent> {
        self.events.subscribe()
    }
}

/// Background side of the save queue.
pub struct SaveQueueHandle {
    command_rx: mpsc::Receiver<Command>,
    events: broadcast::Sender<SaveEvent>,
    debounce: Duration,
}

impl SaveQueueHandle {
    /// Run the queue until shutdown or until every [`SaveQueue`] is dropped.
    ///
    /// This should be spawned in a tokio task. `save_fn` performs one
    /// physical write of the given document.
    pub async fn run<F, Fut>(mut self, save_fn: F)
    where
        F: Fn(Document) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<BackupId>>> + Send,
    {
        let mut pending: Option<Document> = None;
        let mut deadline: Option<Instant> = None;

        debug!(debounce_ms = self.debounce.as_millis() as u64, "Save queue started");

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(Command::Submit(document)) => {
                        if let Some(mut superseded) = pending.replace(document) {
                            superseded.zeroize();
                        }
                        deadline = Some(Instant::now() + self.debounce);
                    }
                    Some(Command::Flush(reply)) => {
                        deadline = None;
                        let result = self.write(&mut pending, &save_fn).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown(reply)) => {
                        let _ = self.write(&mut pending, &save_fn).await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        let _ = self.write(&mut pending, &save_fn).await;
                        break;
                    }
                },

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    let _ = self.write(&mut pending, &save_fn).await;
                }
            }
        }

        info!("Save queue stopped");
    }

    async fn write<F, Fut>(&self, pending: &mut Option<Document>, save_fn: &F) -> Result<()>
    where
        F: Fn(Document) -> Fut,
        Fut: Future<Output = Result<Option<BackupId>>>,
    {
        let Some(document) = pending.take() else {
            return Ok(());
        };

        match save_fn(document).await {
            Ok(backup) => {
                let _ = self.events.send(SaveEvent::Saved { backup });
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Vault save failed");
                let _ = self.events.send(SaveEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
