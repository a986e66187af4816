//! Store configuration.

use crate::history::DEFAULT_HISTORY_LIMIT;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session-storage key the snapshot is saved under by default.
pub const DEFAULT_STORAGE_KEY: &str = "reduxState";

/// Default quiet period before a burst of writes is persisted.
pub const DEFAULT_PERSIST_DELAY_MS: u64 = 1_000;

/// Settings for a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Key of the persisted record in session storage.
    pub storage_key: String,
    /// Trailing debounce for persistence, in milliseconds.
    pub persist_delay_ms: u64,
    /// Number of published snapshots kept in history (0 disables it).
    pub history_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            persist_delay_ms: DEFAULT_PERSIST_DELAY_MS,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    #[must_use]
    pub fn with_persist_delay_ms(mut self, delay_ms: u64) -> Self {
        self.persist_delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn persist_delay(&self) -> Duration {
        Duration::from_millis(self.persist_delay_ms)
    }
}
