//! Shared progress counters and state snapshots.

use crate::error::ReplicationError;
use crate::state::ReplicationState;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Progress shared between the engine worker and external readers.
///
/// The worker is the only writer; any thread may read. Reads are
/// point-in-time snapshots, eventually consistent with the worker's latest
/// committed state, and never require the worker's cooperation.
pub struct Progress {
    changes: AtomicU64,
    completed: AtomicU64,
    state: RwLock<ReplicationState>,
    last_error: RwLock<Option<Arc<ReplicationError>>>,
}

impl Progress {
    /// Creates progress for a fresh replication.
    pub fn new() -> Self {
        Self {
            changes: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            state: RwLock::new(ReplicationState::Initial),
            last_error: RwLock::new(None),
        }
    }

    /// Total changes discovered.
    pub fn changes_count(&self) -> u64 {
        self.changes.load(Ordering::Acquire)
    }

    /// Changes applied.
    pub fn completed_changes_count(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Records newly discovered changes.
    pub fn add_discovered(&self, count: u64) {
        self.changes.fetch_add(count, Ordering::AcqRel);
    }

    /// Records applied changes. The discovered total must already include
    /// them, preserving `completed <= changes` at every observable instant.
    pub fn add_completed(&self, count: u64) {
        self.completed.fetch_add(count, Ordering::AcqRel);
    }

    /// Current state snapshot.
    pub fn state(&self) -> ReplicationState {
        *self.state.read()
    }

    /// Publishes a state change.
    pub fn set_state(&self, state: ReplicationState) {
        *self.state.write() = state;
    }

    /// Last recorded error, if any.
    pub fn last_error(&self) -> Option<Arc<ReplicationError>> {
        self.last_error.read().clone()
    }

    /// Records an error and returns the shared handle to it.
    pub fn record_error(&self, error: ReplicationError) -> Arc<ReplicationError> {
        let error = Arc::new(error);
        *self.last_error.write() = Some(Arc::clone(&error));
        error
    }

    /// Clears the recorded error after a fully successful batch.
    pub fn clear_error(&self) {
        *self.last_error.write() = None;
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let progress = Progress::new();
        assert_eq!(progress.changes_count(), 0);
        assert_eq!(progress.completed_changes_count(), 0);
        assert_eq!(progress.state(), ReplicationState::Initial);
        assert!(progress.last_error().is_none());
    }

    #[test]
    fn completed_never_exceeds_changes_when_discovery_leads() {
        let progress = Progress::new();
        progress.add_discovered(10);
        progress.add_completed(8);
        assert!(progress.completed_changes_count() <= progress.changes_count());
        progress.add_completed(2);
        assert_eq!(progress.completed_changes_count(), 10);
        assert_eq!(progress.changes_count(), 10);
    }

    #[test]
    fn error_snapshot_is_shared() {
        let progress = Progress::new();
        let recorded = progress.record_error(ReplicationError::Auth("401".into()));
        let read = progress.last_error().unwrap();
        assert!(Arc::ptr_eq(&recorded, &read));
    }
}
