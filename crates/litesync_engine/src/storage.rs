//! Local storage collaborator contract.

use litesync_protocol::{
    ChangeEntry, ChangesResponse, Checkpoint, CheckpointId, FeedScope, Revision, RevisionStatus,
    SequenceToken,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::watch;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by the local storage collaborator.
///
/// Storage failures are fatal to a replication: the engine stops
/// immediately rather than retrying against a broken database.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The underlying database was closed mid-run.
    #[error("database closed")]
    Closed,

    /// Any other storage failure.
    #[error("storage failure: {0}")]
    Failure(String),
}

/// The local database as seen by the replication engine.
///
/// Implementations provide their own consistency; every method is safe to
/// call from the engine's serial context without additional locking.
pub trait LocalStore: Send + Sync {
    /// Stable identity of the local database, used for checkpoint
    /// derivation. Survives restarts; changes only when the database is
    /// recreated.
    fn uuid(&self) -> String;

    /// Pending local changes after `since`, bounded by `limit`, restricted
    /// to `scope`. Filter-function evaluation is the store's concern.
    fn changes_since(
        &self,
        since: Option<&SequenceToken>,
        limit: u32,
        scope: &FeedScope,
    ) -> StoreResult<ChangesResponse>;

    /// Reads the bodies of local revisions named by feed entries.
    fn read_revisions(&self, entries: &[ChangeEntry]) -> StoreResult<Vec<Revision>>;

    /// Applies remote revisions. Application is all-or-nothing per
    /// revision; the returned statuses report each outcome so a batch can
    /// partially succeed.
    fn apply_revisions(&self, revisions: &[Revision]) -> StoreResult<Vec<RevisionStatus>>;

    /// Reads a locally persisted checkpoint.
    fn read_checkpoint(&self, id: &CheckpointId) -> StoreResult<Option<Checkpoint>>;

    /// Durably records a checkpoint.
    fn write_checkpoint(&self, checkpoint: &Checkpoint) -> StoreResult<()>;

    /// A wakeup signal whose value increases on every local commit. Used by
    /// continuous push replications to notice new local changes without
    /// polling.
    fn change_signal(&self) -> watch::Receiver<u64>;
}

/// An in-memory [`LocalStore`] for tests and examples.
pub struct MemoryStore {
    uuid: String,
    feed: RwLock<Vec<ChangeEntry>>,
    revisions: RwLock<BTreeMap<(String, String), Revision>>,
    checkpoints: RwLock<BTreeMap<CheckpointId, Checkpoint>>,
    checkpoint_log: RwLock<Vec<Checkpoint>>,
    next_seq: RwLock<u64>,
    closed: RwLock<bool>,
    reject_once: RwLock<BTreeMap<String, u16>>,
    signal: watch::Sender<u64>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(uuid: impl Into<String>) -> Self {
        let (signal, _) = watch::channel(0);
        Self {
            uuid: uuid.into(),
            feed: RwLock::new(Vec::new()),
            revisions: RwLock::new(BTreeMap::new()),
            checkpoints: RwLock::new(BTreeMap::new()),
            checkpoint_log: RwLock::new(Vec::new()),
            next_seq: RwLock::new(0),
            closed: RwLock::new(false),
            reject_once: RwLock::new(BTreeMap::new()),
            signal,
        }
    }

    /// Commits a local revision, assigning it the next sequence.
    pub fn put(&self, doc_id: impl Into<String>, rev_id: impl Into<String>, body: serde_json::Value) {
        let doc_id = doc_id.into();
        let rev_id = rev_id.into();
        let seq = {
            let mut next = self.next_seq.write();
            *next += 1;
            *next
        };
        self.revisions.write().insert(
            (doc_id.clone(), rev_id.clone()),
            Revision::new(doc_id.clone(), rev_id.clone(), body),
        );
        self.feed
            .write()
            .push(ChangeEntry::new(seq.to_string(), doc_id, rev_id));
        let _ = self.signal.send(seq);
    }

    /// Marks the store closed; every subsequent call fails.
    pub fn close(&self) {
        *self.closed.write() = true;
    }

    /// Makes the next application of `doc_id` fail with `status`.
    pub fn reject_next_apply(&self, doc_id: impl Into<String>, status: u16) {
        self.reject_once.write().insert(doc_id.into(), status);
    }

    /// Revisions applied or committed, keyed by (doc ID, revision ID).
    pub fn revision_count(&self) -> usize {
        self.revisions.read().len()
    }

    /// Returns a stored revision body, if present.
    pub fn get(&self, doc_id: &str, rev_id: &str) -> Option<Revision> {
        self.revisions
            .read()
            .get(&(doc_id.to_string(), rev_id.to_string()))
            .cloned()
    }

    /// Every checkpoint write, in order. Lets tests observe write ordering
    /// and token monotonicity.
    pub fn checkpoint_writes(&self) -> Vec<Checkpoint> {
        self.checkpoint_log.read().clone()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if *self.closed.read() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

impl LocalStore for MemoryStore {
    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    fn changes_since(
        &self,
        since: Option<&SequenceToken>,
        limit: u32,
        scope: &FeedScope,
    ) -> StoreResult<ChangesResponse> {
        self.ensure_open()?;
        let since: u64 = since
            .map(|token| token.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        let feed = self.feed.read();
        let entries: Vec<ChangeEntry> = feed
            .iter()
            .filter(|entry| entry.seq.as_str().parse::<u64>().unwrap_or(0) > since)
            .filter(|entry| match &scope.doc_ids {
                Some(allow) => allow.contains(&entry.doc_id),
                None => true,
            })
            .take(limit as usize)
            .cloned()
            .collect();
        let last_seq = entries
            .last()
            .map(|entry| entry.seq.clone())
            .unwrap_or_else(|| SequenceToken::new(since.to_string()));
        Ok(ChangesResponse {
            entries,
            last_seq,
        })
    }

    fn read_revisions(&self, entries: &[ChangeEntry]) -> StoreResult<Vec<Revision>> {
        self.ensure_open()?;
        let revisions = self.revisions.read();
        let mut out = Vec::new();
        for entry in entries {
            for rev in &entry.revs {
                if let Some(revision) =
                    revisions.get(&(entry.doc_id.clone(), rev.as_str().to_string()))
                {
                    out.push(revision.clone());
                }
            }
        }
        Ok(out)
    }

    fn apply_revisions(&self, revisions: &[Revision]) -> StoreResult<Vec<RevisionStatus>> {
        self.ensure_open()?;
        let mut statuses = Vec::with_capacity(revisions.len());
        for revision in revisions {
            let rejected = self.reject_once.write().remove(&revision.doc_id);
            match rejected {
                Some(status) => {
                    statuses.push(RevisionStatus::rejected(
                        revision.doc_id.clone(),
                        revision.rev_id.clone(),
                        status,
                        "injected failure",
                    ));
                }
                None => {
                    self.revisions.write().insert(
                        (revision.doc_id.clone(), revision.rev_id.as_str().to_string()),
                        revision.clone(),
                    );
                    statuses.push(RevisionStatus::accepted(
                        revision.doc_id.clone(),
                        revision.rev_id.clone(),
                    ));
                }
            }
        }
        Ok(statuses)
    }

    fn read_checkpoint(&self, id: &CheckpointId) -> StoreResult<Option<Checkpoint>> {
        self.ensure_open()?;
        Ok(self.checkpoints.read().get(id).cloned())
    }

    fn write_checkpoint(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        self.ensure_open()?;
        self.checkpoints
            .write()
            .insert(checkpoint.id.clone(), checkpoint.clone());
        self.checkpoint_log.write().push(checkpoint.clone());
        Ok(())
    }

    fn change_signal(&self) -> watch::Receiver<u64> {
        self.signal.subscribe()
    }
}
