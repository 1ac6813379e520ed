//! Revision and sequence types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque ordering token issued by one side of a replication stream.
///
/// Tokens are specific to the server and direction that issued them. They
/// are compared only for equality; litesync never assumes they are numeric
/// or orders them itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceToken(String);

impl SequenceToken {
    /// Creates a token from its wire representation.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the wire representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SequenceToken {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for SequenceToken {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

/// A revision identifier within a document's revision history.
///
/// The format (generation prefix, digest suffix) is owned by the storage
/// collaborators; litesync treats it as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    /// Creates a revision ID from its wire representation.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the wire representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RevisionId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// A single document revision travelling between databases.
///
/// Tombstones carry `deleted = true` and no body. The body is an opaque
/// JSON document; litesync never interprets its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Document ID.
    pub doc_id: String,
    /// Revision ID.
    pub rev_id: RevisionId,
    /// Whether this revision is a deletion.
    #[serde(default)]
    pub deleted: bool,
    /// Document body (absent for tombstones).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Revision {
    /// Creates a live revision with a body.
    pub fn new(doc_id: impl Into<String>, rev_id: impl Into<RevisionId>, body: serde_json::Value) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev_id: rev_id.into(),
            deleted: false,
            body: Some(body),
        }
    }

    /// Creates a deletion tombstone.
    pub fn tombstone(doc_id: impl Into<String>, rev_id: impl Into<RevisionId>) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev_id: rev_id.into(),
            deleted: true,
            body: None,
        }
    }
}

impl From<String> for RevisionId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}
