//! Checkpoint persistence and reconciliation.

use crate::config::CheckpointPolicy;
use crate::error::{ReplicationError, ReplicationResult};
use crate::storage::LocalStore;
use crate::transport::Transport;
use litesync_protocol::{Checkpoint, CheckpointId, SequenceToken};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reads and writes the last-synced position for one checkpoint lineage.
///
/// The local record is authoritative for resume correctness; the remote
/// mirror exists so a fresh local install can adopt the server's last-known
/// position instead of re-transferring everything. A mirror write failure
/// never blocks progress: it is logged, remembered, and retried on the next
/// save.
pub struct CheckpointStore {
    id: CheckpointId,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn Transport>,
    policy: CheckpointPolicy,
    mirror_dirty: AtomicBool,
}

impl CheckpointStore {
    /// Creates a store for one lineage.
    pub fn new(
        id: CheckpointId,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn Transport>,
        policy: CheckpointPolicy,
    ) -> Self {
        Self {
            id,
            local,
            remote,
            policy,
            mirror_dirty: AtomicBool::new(false),
        }
    }

    /// The lineage identity.
    pub fn id(&self) -> &CheckpointId {
        &self.id
    }

    /// True if the last mirror write failed and has not been retried
    /// successfully.
    pub fn mirror_dirty(&self) -> bool {
        self.mirror_dirty.load(Ordering::Acquire)
    }

    /// Resolves the checkpoint to resume from.
    ///
    /// A local read failure is fatal. A remote read failure degrades to
    /// "mirror absent": at worst the replication re-transfers revisions,
    /// which is safe.
    pub async fn load(&self) -> ReplicationResult<Checkpoint> {
        let local = self.local.read_checkpoint(&self.id)?;
        let remote = match self.remote.get_checkpoint(&self.id).await {
            Ok(found) => found.filter(|checkpoint| {
                if checkpoint.id != self.id {
                    tracing::warn!(
                        expected = %self.id,
                        found = %checkpoint.id,
                        "remote checkpoint identity mismatch; ignoring mirror"
                    );
                    false
                } else {
                    true
                }
            }),
            Err(error) => {
                tracing::warn!(%error, "remote checkpoint read failed; treating mirror as absent");
                None
            }
        };

        let resolved = match (local, remote) {
            (None, None) => Checkpoint::fresh(self.id.clone()),
            (Some(local), None) => local,
            (None, Some(remote)) => {
                tracing::debug!(id = %self.id, "adopting remote checkpoint for fresh local install");
                // Record the adopted position so the next run starts local.
                self.local.write_checkpoint(&remote)?;
                remote
            }
            (Some(local), Some(remote)) => {
                if local.last_sequence == remote.last_sequence {
                    local
                } else {
                    tracing::warn!(
                        id = %self.id,
                        policy = ?self.policy,
                        "local and remote checkpoints disagree"
                    );
                    match self.policy {
                        CheckpointPolicy::TrustLocal => local,
                        CheckpointPolicy::TrustRemote => remote,
                        CheckpointPolicy::FullResync => Checkpoint::fresh(self.id.clone()),
                    }
                }
            }
        };
        Ok(resolved)
    }

    /// Durably records progress in the local store.
    ///
    /// Returns the written checkpoint; mirror it afterwards with
    /// [`CheckpointStore::mirror`].
    pub fn save_local(&self, token: SequenceToken) -> ReplicationResult<Checkpoint> {
        let checkpoint = Checkpoint::at(self.id.clone(), token);
        self.local.write_checkpoint(&checkpoint)?;
        tracing::debug!(id = %self.id, seq = ?checkpoint.last_sequence, "local checkpoint written");
        Ok(checkpoint)
    }

    /// Best-effort remote mirror write.
    pub async fn mirror(&self, checkpoint: &Checkpoint) {
        match self.remote.put_checkpoint(checkpoint).await {
            Ok(()) => {
                if self.mirror_dirty.swap(false, Ordering::AcqRel) {
                    tracing::debug!(id = %self.id, "remote checkpoint mirror caught up");
                }
            }
            Err(error) => {
                self.mirror_dirty.store(true, Ordering::Release);
                tracing::warn!(
                    id = %self.id,
                    %error,
                    "remote checkpoint mirror write failed; will retry on next save"
                );
            }
        }
    }
}
