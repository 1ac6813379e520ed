//! Fetch and upload messages.

use crate::changes::ChangeEntry;
use crate::revision::{Revision, RevisionId};
use serde::{Deserialize, Serialize};

/// A request for the bodies of pending revisions (pull direction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Feed entries whose revisions should be returned.
    pub entries: Vec<ChangeEntry>,
}

impl FetchRequest {
    /// Creates a fetch request.
    pub fn new(entries: Vec<ChangeEntry>) -> Self {
        Self { entries }
    }
}

/// Revision bodies answering a [`FetchRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    /// Revisions in request order.
    pub revisions: Vec<Revision>,
}

impl FetchResponse {
    /// Creates a fetch response.
    pub fn new(revisions: Vec<Revision>) -> Self {
        Self { revisions }
    }
}

/// A batch of local revisions sent to the remote (push direction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Revisions to store remotely.
    pub revisions: Vec<Revision>,
}

impl UploadRequest {
    /// Creates an upload request.
    pub fn new(revisions: Vec<Revision>) -> Self {
        Self { revisions }
    }
}

/// Outcome of one revision within an upload batch.
///
/// Uploads succeed or fail per revision; the batch as a whole reports
/// partial success through the full status list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionStatus {
    /// Document ID.
    pub doc_id: String,
    /// Revision ID.
    pub rev_id: RevisionId,
    /// HTTP-style status code for this revision.
    pub status: u16,
    /// Server error message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RevisionStatus {
    /// Marks a revision as stored.
    pub fn accepted(doc_id: impl Into<String>, rev_id: impl Into<RevisionId>) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev_id: rev_id.into(),
            status: 201,
            error: None,
        }
    }

    /// Marks a revision as rejected with a status code and message.
    pub fn rejected(
        doc_id: impl Into<String>,
        rev_id: impl Into<RevisionId>,
        status: u16,
        error: impl Into<String>,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev_id: rev_id.into(),
            status,
            error: Some(error.into()),
        }
    }

    /// Returns true if the revision was stored.
    pub fn is_accepted(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true if the rejection is worth retrying.
    pub fn is_transient(&self) -> bool {
        self.status == 429 || (500..600).contains(&self.status)
    }
}

/// Per-revision statuses answering an [`UploadRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// One status per uploaded revision, in request order.
    pub statuses: Vec<RevisionStatus>,
}

impl UploadResponse {
    /// Creates an upload response.
    pub fn new(statuses: Vec<RevisionStatus>) -> Self {
        Self { statuses }
    }

    /// Returns true if every revision was stored.
    pub fn all_accepted(&self) -> bool {
        self.statuses.iter().all(RevisionStatus::is_accepted)
    }
}
