//! Change-feed types.

use crate::revision::{RevisionId, SequenceToken};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scope restricting which documents a change feed reports.
///
/// A channel allowlist is sugar over a server-side filter; both are carried
/// verbatim so the serving side can evaluate them. Filter evaluation itself
/// is a collaborator concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedScope {
    /// Optional filter function name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Parameters passed to the filter function.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter_params: BTreeMap<String, serde_json::Value>,
    /// Explicit document-ID allowlist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_ids: Option<Vec<String>>,
    /// Channel allowlist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
}

impl FeedScope {
    /// Returns true if the scope imposes no restriction.
    pub fn is_unfiltered(&self) -> bool {
        self.filter.is_none() && self.doc_ids.is_none() && self.channels.is_none()
    }
}

/// One entry in a change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Ordering token of this change within its feed.
    pub seq: SequenceToken,
    /// Document ID.
    pub doc_id: String,
    /// Leaf revision IDs pending transfer for this document.
    pub revs: Vec<RevisionId>,
}

impl ChangeEntry {
    /// Creates an entry with a single pending revision.
    pub fn new(
        seq: impl Into<SequenceToken>,
        doc_id: impl Into<String>,
        rev: impl Into<RevisionId>,
    ) -> Self {
        Self {
            seq: seq.into(),
            doc_id: doc_id.into(),
            revs: vec![rev.into()],
        }
    }
}

/// A request for pending changes since a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesRequest {
    /// Resume position; `None` means the beginning of history.
    pub since: Option<SequenceToken>,
    /// Maximum number of entries to return.
    pub limit: u32,
    /// Whether the serving side may hold the request open until changes
    /// appear (long poll). One-shot discovery passes `false`.
    #[serde(default)]
    pub wait: bool,
    /// Document scope.
    #[serde(default)]
    pub scope: FeedScope,
}

/// A batch of pending changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Entries in feed order.
    pub entries: Vec<ChangeEntry>,
    /// Token to resume from after consuming `entries`.
    pub last_seq: SequenceToken,
}

impl ChangesResponse {
    /// Creates a response.
    pub fn new(entries: Vec<ChangeEntry>, last_seq: impl Into<SequenceToken>) -> Self {
        Self {
            entries,
            last_seq: last_seq.into(),
        }
    }

    /// Returns true if the feed reported no pending changes.
    pub fn is_caught_up(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unfiltered_scope() {
        assert!(FeedScope::default().is_unfiltered());

        let scoped = FeedScope {
            channels: Some(vec!["news".into()]),
            ..FeedScope::default()
        };
        assert!(!scoped.is_unfiltered());
    }

    #[test]
    fn scope_serializes_sparsely() {
        let value = serde_json::to_value(FeedScope::default()).unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn caught_up_response() {
        let resp = ChangesResponse::new(vec![], "42-token");
        assert!(resp.is_caught_up());
        assert_eq!(resp.last_seq, SequenceToken::new("42-token"));

        let resp = ChangesResponse::new(vec![ChangeEntry::new("1", "doc-1", "1-a")], "1");
        assert!(!resp.is_caught_up());
    }
}
