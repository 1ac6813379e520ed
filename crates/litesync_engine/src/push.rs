//! Push direction: read local changes, send them remotely.

use crate::engine::Driver;
use crate::error::{ReplicationError, ReplicationResult};
use crate::storage::LocalStore;
use crate::transport::Transport;
use async_trait::async_trait;
use litesync_protocol::{
    ChangeEntry, ChangesResponse, FeedScope, RevisionStatus, SequenceToken, UploadRequest,
};
use std::sync::Arc;

/// Push specialization: the change feed is the local database's, and
/// batches flow local to remote.
pub(crate) struct Pusher {
    local: Arc<dyn LocalStore>,
    transport: Arc<dyn Transport>,
    scope: FeedScope,
    batch_size: u32,
}

impl Pusher {
    pub(crate) fn new(
        local: Arc<dyn LocalStore>,
        transport: Arc<dyn Transport>,
        scope: FeedScope,
        batch_size: u32,
    ) -> Self {
        Self {
            local,
            transport,
            scope,
            batch_size,
        }
    }
}

#[async_trait]
impl Driver for Pusher {
    async fn discover(
        &self,
        since: Option<SequenceToken>,
        wait: bool,
    ) -> ReplicationResult<ChangesResponse> {
        let mut signal = self.local.change_signal();
        loop {
            // Mark the current signal value seen before querying, so a
            // commit landing between the query and the wait still wakes us.
            signal.borrow_and_update();
            let response =
                self.local
                    .changes_since(since.as_ref(), self.batch_size, &self.scope)?;
            if !response.is_caught_up() || !wait {
                return Ok(response);
            }
            if signal.changed().await.is_err() {
                return Err(ReplicationError::storage("local change signal closed"));
            }
        }
    }

    async fn transfer(&self, entries: &[ChangeEntry]) -> ReplicationResult<Vec<RevisionStatus>> {
        let revisions = self.local.read_revisions(entries)?;
        let response = self
            .transport
            .upload_revisions(UploadRequest::new(revisions))
            .await?;
        Ok(response.statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::transport::MockTransport;
    use litesync_protocol::UploadResponse;
    use serde_json::json;
    use std::time::Duration;

    fn make_pusher() -> (Arc<MemoryStore>, Arc<MockTransport>, Arc<Pusher>) {
        let local = Arc::new(MemoryStore::new("local-db"));
        let transport = Arc::new(MockTransport::new());
        let pusher = Arc::new(Pusher::new(
            Arc::clone(&local) as Arc<dyn LocalStore>,
            Arc::clone(&transport) as Arc<dyn Transport>,
            FeedScope::default(),
            10,
        ));
        (local, transport, pusher)
    }

    #[tokio::test]
    async fn discover_returns_pending_changes_immediately() {
        let (local, _, pusher) = make_pusher();
        local.put("doc-1", "1-a", json!({}));
        local.put("doc-2", "1-b", json!({}));

        let response = pusher.discover(None, true).await.unwrap();
        assert_eq!(response.entries.len(), 2);
    }

    #[tokio::test]
    async fn discover_without_wait_reports_caught_up() {
        let (_, _, pusher) = make_pusher();
        let response = pusher.discover(None, false).await.unwrap();
        assert!(response.is_caught_up());
    }

    #[tokio::test]
    async fn quiescent_discover_wakes_on_local_commit() {
        let (local, _, pusher) = make_pusher();

        let waiter = {
            let pusher = Arc::clone(&pusher);
            tokio::spawn(async move { pusher.discover(None, true).await })
        };

        // Let the discover task park on the change signal, then commit.
        tokio::time::sleep(Duration::from_millis(10)).await;
        local.put("late", "1-z", json!({}));

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.entries.len(), 1);
        assert_eq!(response.entries[0].doc_id, "late");
    }

    #[tokio::test]
    async fn transfer_uploads_local_bodies() {
        let (local, transport, pusher) = make_pusher();
        local.put("doc-1", "1-a", json!({"n": 1}));
        transport.push_upload(Ok(UploadResponse::new(vec![RevisionStatus::accepted(
            "doc-1", "1-a",
        )])));

        let entries = vec![ChangeEntry::new("1", "doc-1", "1-a")];
        let statuses = pusher.transfer(&entries).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].is_accepted());
    }

    #[tokio::test]
    async fn transfer_surfaces_per_revision_rejections() {
        let (local, transport, pusher) = make_pusher();
        local.put("ok", "1-a", json!({}));
        local.put("bad", "1-b", json!({}));
        transport.push_upload(Ok(UploadResponse::new(vec![
            RevisionStatus::accepted("ok", "1-a"),
            RevisionStatus::rejected("bad", "1-b", 500, "server hiccup"),
        ])));

        let entries = vec![
            ChangeEntry::new("1", "ok", "1-a"),
            ChangeEntry::new("2", "bad", "1-b"),
        ];
        let statuses = pusher.transfer(&entries).await.unwrap();
        assert!(statuses[0].is_accepted());
        assert!(statuses[1].is_transient());
    }
}
