//! Checkpoint documents and identity.

use crate::changes::FeedScope;
use crate::revision::SequenceToken;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Replication direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Remote to local.
    Pull,
    /// Local to remote.
    Push,
}

impl Direction {
    /// Returns true for pull replications.
    pub fn is_pull(&self) -> bool {
        matches!(self, Direction::Pull)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Pull => f.write_str("pull"),
            Direction::Push => f.write_str("push"),
        }
    }
}

/// Deterministic identity of a checkpoint lineage.
///
/// Derived from everything that defines which revisions a replication
/// covers: local database identity, remote endpoint, direction, and feed
/// scope. Changing any of these yields an independent lineage, so a
/// re-scoped replication never resumes from another scope's position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl CheckpointId {
    /// Derives the checkpoint ID for a replication configuration.
    pub fn derive(
        local_uuid: &str,
        remote_url: &str,
        direction: Direction,
        scope: &FeedScope,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(local_uuid.as_bytes());
        hasher.update([0u8]);
        hasher.update(remote_url.as_bytes());
        hasher.update([0u8]);
        hasher.update(direction.to_string().as_bytes());
        hasher.update([0u8]);
        // FeedScope serializes with sorted keys (BTreeMap), so the digest
        // input is canonical.
        let scope_json = serde_json::to_vec(scope).unwrap_or_default();
        hasher.update(&scope_json);
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A durable marker of replication progress.
///
/// Persisted locally and mirrored to the remote server under the same ID.
/// The ID travels inside the document so either side can verify it is
/// reading the lineage it expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Lineage identity.
    pub id: CheckpointId,
    /// Last fully processed position; `None` means no progress recorded.
    pub last_sequence: Option<SequenceToken>,
}

impl Checkpoint {
    /// Creates a checkpoint with no recorded progress.
    pub fn fresh(id: CheckpointId) -> Self {
        Self {
            id,
            last_sequence: None,
        }
    }

    /// Creates a checkpoint at a position.
    pub fn at(id: CheckpointId, token: impl Into<SequenceToken>) -> Self {
        Self {
            id,
            last_sequence: Some(token.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope_with_channels(channels: &[&str]) -> FeedScope {
        FeedScope {
            channels: Some(channels.iter().map(|c| c.to_string()).collect()),
            ..FeedScope::default()
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = CheckpointId::derive("db-uuid", "https://sync.example.com/db", Direction::Pull, &FeedScope::default());
        let b = CheckpointId::derive("db-uuid", "https://sync.example.com/db", Direction::Pull, &FeedScope::default());
        assert_eq!(a, b);
    }

    #[test]
    fn scope_changes_the_lineage() {
        let base = CheckpointId::derive("db-uuid", "https://sync.example.com/db", Direction::Pull, &FeedScope::default());
        let filtered = CheckpointId::derive(
            "db-uuid",
            "https://sync.example.com/db",
            Direction::Pull,
            &scope_with_channels(&["news"]),
        );
        assert_ne!(base, filtered);
    }

    #[test]
    fn direction_changes_the_lineage() {
        let pull = CheckpointId::derive("db-uuid", "https://sync.example.com/db", Direction::Pull, &FeedScope::default());
        let push = CheckpointId::derive("db-uuid", "https://sync.example.com/db", Direction::Push, &FeedScope::default());
        assert_ne!(pull, push);
    }

    #[test]
    fn endpoint_changes_the_lineage() {
        let a = CheckpointId::derive("db-uuid", "https://a.example.com/db", Direction::Push, &FeedScope::default());
        let b = CheckpointId::derive("db-uuid", "https://b.example.com/db", Direction::Push, &FeedScope::default());
        assert_ne!(a, b);
    }

    #[test]
    fn fresh_checkpoint_has_no_position() {
        let id = CheckpointId::derive("u", "r", Direction::Pull, &FeedScope::default());
        let cp = Checkpoint::fresh(id.clone());
        assert!(cp.last_sequence.is_none());

        let cp = Checkpoint::at(id, "seq-9");
        assert_eq!(cp.last_sequence, Some(SequenceToken::new("seq-9")));
    }

    proptest::proptest! {
        /// Lineages are independent: any difference in identity inputs
        /// yields a different checkpoint ID, and equal inputs always yield
        /// the same one.
        #[test]
        fn lineages_do_not_collide(
            uuid_a in "[a-z0-9-]{1,32}",
            uuid_b in "[a-z0-9-]{1,32}",
            url in "https://[a-z]{1,12}/[a-z]{1,12}",
        ) {
            let a = CheckpointId::derive(&uuid_a, &url, Direction::Pull, &FeedScope::default());
            let b = CheckpointId::derive(&uuid_b, &url, Direction::Pull, &FeedScope::default());
            proptest::prop_assert_eq!(a == b, uuid_a == uuid_b);
        }
    }
}
