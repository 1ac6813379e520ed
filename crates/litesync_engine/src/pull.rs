//! Pull direction: fetch remote changes, apply them locally.

use crate::engine::Driver;
use crate::error::ReplicationResult;
use crate::storage::LocalStore;
use crate::transport::Transport;
use async_trait::async_trait;
use litesync_protocol::{
    ChangeEntry, ChangesRequest, ChangesResponse, FeedScope, FetchRequest, RevisionStatus,
    SequenceToken,
};
use std::sync::Arc;

/// Pull specialization: the change feed is the remote's, and batches flow
/// remote to local.
pub(crate) struct Puller {
    transport: Arc<dyn Transport>,
    local: Arc<dyn LocalStore>,
    scope: FeedScope,
    batch_size: u32,
}

impl Puller {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        local: Arc<dyn LocalStore>,
        scope: FeedScope,
        batch_size: u32,
    ) -> Self {
        Self {
            transport,
            local,
            scope,
            batch_size,
        }
    }
}

#[async_trait]
impl Driver for Puller {
    async fn discover(
        &self,
        since: Option<SequenceToken>,
        wait: bool,
    ) -> ReplicationResult<ChangesResponse> {
        self.transport
            .changes(ChangesRequest {
                since,
                limit: self.batch_size,
                wait,
                scope: self.scope.clone(),
            })
            .await
    }

    async fn transfer(&self, entries: &[ChangeEntry]) -> ReplicationResult<Vec<RevisionStatus>> {
        let fetched = self
            .transport
            .fetch_revisions(FetchRequest::new(entries.to_vec()))
            .await?;
        let statuses = self.local.apply_revisions(&fetched.revisions)?;
        Ok(statuses)
    }
}
