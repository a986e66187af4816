//! Session persistence: debounced saves and startup rehydration.
//!
//! Snapshots are written as JSON text under a single key. Writes are
//! coalesced on a background task with a trailing debounce, so a burst of
//! dispatches ends in exactly one save of the last snapshot.

mod file;
mod memory;

pub use file::FileSessionStorage;
pub use memory::MemorySessionStorage;

use crate::error::{PersistenceError, StoreError, StoreResult};
use crate::Value;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// A session-scoped key/value text store.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Read an item. `Ok(None)` when the key is absent.
    async fn get_item(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    /// Write an item, replacing any previous value.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
}

enum Command {
    Save(Value),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background persistence worker.
///
/// Dropping the handle closes the channel; the worker then saves whatever is
/// still pending and exits.
pub struct Persister {
    storage: Arc<dyn SessionStorage>,
    key: String,
    tx: mpsc::UnboundedSender<Command>,
}

impl Persister {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(
        storage: Arc<dyn SessionStorage>,
        key: impl Into<String>,
        delay: Duration,
    ) -> StoreResult<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| StoreError::NoAsyncRuntime)?;
        let key = key.into();
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(run_worker(Arc::clone(&storage), key.clone(), delay, rx));
        Ok(Self { storage, key, tx })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the persisted snapshot.
    ///
    /// Missing records yield `None`; so do unreadable or unparsable ones,
    /// after a warning.
    pub async fn load_persisted(&self) -> Option<Value> {
        let text = match self.storage.get_item(&self.key).await {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, key = %self.key, "failed to read persisted state");
                return None;
            }
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, key = %self.key, "persisted state is not valid JSON");
                None
            }
        }
    }

    /// Queue `snapshot` for a debounced save. Never blocks.
    pub fn schedule_persist(&self, snapshot: Value) {
        if self.tx.send(Command::Save(snapshot)).is_err() {
            tracing::warn!(key = %self.key, "persistence worker stopped; snapshot not saved");
        }
    }

    /// Save any pending snapshot now and wait for the write to finish.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl std::fmt::Debug for Persister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persister").field("key", &self.key).finish()
    }
}

async fn run_worker(
    storage: Arc<dyn SessionStorage>,
    key: String,
    delay: Duration,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut pending: Option<(Value, Instant)> = None;

    loop {
        let deadline = pending.as_ref().map(|(_, deadline)| *deadline);
        let command = match deadline {
            Some(deadline) => {
                tokio::select! {
                    command = rx.recv() => command,
                    _ = tokio::time::sleep_until(deadline) => {
                        if let Some((snapshot, _)) = pending.take() {
                            save(storage.as_ref(), &key, &snapshot).await;
                        }
                        continue;
                    }
                }
            }
            None => rx.recv().await,
        };

        match command {
            Some(Command::Save(snapshot)) => {
                pending = Some((snapshot, Instant::now() + delay));
            }
            Some(Command::Flush(done)) => {
                if let Some((snapshot, _)) = pending.take() {
                    save(storage.as_ref(), &key, &snapshot).await;
                }
                let _ = done.send(());
            }
            None => {
                if let Some((snapshot, _)) = pending.take() {
                    save(storage.as_ref(), &key, &snapshot).await;
                }
                break;
            }
        }
    }
}

async fn save(storage: &dyn SessionStorage, key: &str, snapshot: &Value) {
    let result = match serde_json::to_string(snapshot) {
        Ok(text) => storage.set_item(key, &text).await,
        Err(e) => Err(PersistenceError::from(e)),
    };
    match result {
        Ok(()) => tracing::debug!(key = %key, "persisted state snapshot"),
        Err(e) => tracing::warn!(error = %e, key = %key, "failed to persist state snapshot"),
    }
}
