//! Bounded log of recently published snapshots.

use crate::Value;
use std::collections::VecDeque;

/// Number of entries kept when no limit is configured.
pub const DEFAULT_HISTORY_LIMIT: usize = 25;

/// A published snapshot and the dispatch key that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    /// Dispatch key of the action (`"@@set person.name"`, `"@@init"`, ...).
    pub label: String,
    /// Root after the action was applied.
    pub snapshot: Value,
}

/// Ring buffer of the most recent publishes, oldest first.
///
/// Snapshots share structure with each other, so keeping a window of them
/// costs roughly the size of the changed paths, not of whole roots.
#[derive(Clone, Debug)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl History {
    /// A limit of zero disables recording.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(DEFAULT_HISTORY_LIMIT)),
            limit,
        }
    }

    /// Append an entry, evicting the oldest ones beyond the limit.
    pub fn record(&mut self, label: impl Into<String>, snapshot: Value) {
        if self.limit == 0 {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            label: label.into(),
            snapshot,
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Clear history (keeps the limit).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
