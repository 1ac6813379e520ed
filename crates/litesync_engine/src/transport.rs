//! Remote transport collaborator contract.

use crate::config::Authenticator;
use crate::error::{ReplicationError, ReplicationResult};
use async_trait::async_trait;
use litesync_protocol::{
    ChangesRequest, ChangesResponse, Checkpoint, CheckpointId, FetchRequest, FetchResponse,
    UploadRequest, UploadResponse,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;

/// When a cookie expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieExpiry {
    /// Valid for a duration from now.
    MaxAge(Duration),
    /// Valid until an absolute time.
    At(SystemTime),
}

/// An HTTP cookie attached to replication requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Path attribute; empty means the remote endpoint's path.
    pub path: String,
    /// Expiry.
    pub expiry: CookieExpiry,
    /// Whether the cookie is only sent over a secure protocol.
    pub secure: bool,
}

impl Cookie {
    /// Creates a cookie valid for `max_age` from now.
    pub fn with_max_age(
        name: impl Into<String>,
        value: impl Into<String>,
        path: impl Into<String>,
        max_age: Duration,
        secure: bool,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: path.into(),
            expiry: CookieExpiry::MaxAge(max_age),
            secure,
        }
    }

    /// Creates a cookie valid until `expires`.
    pub fn expiring_at(
        name: impl Into<String>,
        value: impl Into<String>,
        path: impl Into<String>,
        expires: SystemTime,
        secure: bool,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: path.into(),
            expiry: CookieExpiry::At(expires),
            secure,
        }
    }
}

/// The remote document store as seen by the replication engine.
///
/// Network calls are async and non-blocking relative to the engine's serial
/// context; the engine issues them from spawned sub-tasks. Cookie and
/// header management is synchronous local bookkeeping.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Requests pending remote changes. With `request.wait` set the call may
    /// block server-side until changes appear (long poll).
    async fn changes(&self, request: ChangesRequest) -> ReplicationResult<ChangesResponse>;

    /// Fetches revision bodies for pull.
    async fn fetch_revisions(&self, request: FetchRequest) -> ReplicationResult<FetchResponse>;

    /// Uploads local revisions for push; statuses report per-revision
    /// outcomes.
    async fn upload_revisions(&self, request: UploadRequest) -> ReplicationResult<UploadResponse>;

    /// Reads the remote checkpoint mirror.
    async fn get_checkpoint(&self, id: &CheckpointId) -> ReplicationResult<Option<Checkpoint>>;

    /// Writes the remote checkpoint mirror.
    async fn put_checkpoint(&self, checkpoint: &Checkpoint) -> ReplicationResult<()>;

    /// Replaces the extra headers sent with every request.
    fn set_extra_headers(&self, headers: BTreeMap<String, String>);

    /// Installs credentials.
    fn set_authenticator(&self, authenticator: Option<Authenticator>);

    /// Stores a cookie.
    fn set_cookie(&self, cookie: Cookie);

    /// Deletes a cookie by name.
    fn delete_cookie(&self, name: &str);

    /// Aborts outstanding requests. Pending calls fail with a cancellation
    /// error; subsequent calls proceed normally.
    fn cancel_outstanding(&self);
}

/// A scriptable [`Transport`] for tests.
///
/// Responses are queued per operation and consumed in order. A `changes`
/// call with `wait` set and an empty queue parks until a response is pushed,
/// imitating a quiescent long-poll feed.
pub struct MockTransport {
    connected: AtomicBool,
    changes: Mutex<VecDeque<ReplicationResult<ChangesResponse>>>,
    fetches: Mutex<VecDeque<ReplicationResult<FetchResponse>>>,
    uploads: Mutex<VecDeque<ReplicationResult<UploadResponse>>>,
    checkpoints: Mutex<BTreeMap<CheckpointId, Checkpoint>>,
    checkpoint_put_failures: AtomicU64,
    headers: Mutex<BTreeMap<String, String>>,
    authenticator: Mutex<Option<Authenticator>>,
    cookies: Mutex<Vec<Cookie>>,
    cancellations: AtomicU64,
    cancelled: AtomicBool,
    feed_wakeup: Notify,
}

impl MockTransport {
    /// Creates a connected mock with empty queues.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            changes: Mutex::new(VecDeque::new()),
            fetches: Mutex::new(VecDeque::new()),
            uploads: Mutex::new(VecDeque::new()),
            checkpoints: Mutex::new(BTreeMap::new()),
            checkpoint_put_failures: AtomicU64::new(0),
            headers: Mutex::new(BTreeMap::new()),
            authenticator: Mutex::new(None),
            cookies: Mutex::new(Vec::new()),
            cancellations: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            feed_wakeup: Notify::new(),
        }
    }

    /// Queues a changes response.
    pub fn push_changes(&self, response: ReplicationResult<ChangesResponse>) {
        self.changes.lock().push_back(response);
        // notify_one stores a permit, so a push racing a parking long poll
        // is never lost.
        self.feed_wakeup.notify_one();
    }

    /// Queues a fetch response.
    pub fn push_fetch(&self, response: ReplicationResult<FetchResponse>) {
        self.fetches.lock().push_back(response);
    }

    /// Queues an upload response.
    pub fn push_upload(&self, response: ReplicationResult<UploadResponse>) {
        self.uploads.lock().push_back(response);
    }

    /// Seeds the remote checkpoint mirror.
    pub fn seed_checkpoint(&self, checkpoint: Checkpoint) {
        self.checkpoints
            .lock()
            .insert(checkpoint.id.clone(), checkpoint);
    }

    /// Makes the next `count` checkpoint writes fail.
    pub fn fail_checkpoint_puts(&self, count: u64) {
        self.checkpoint_put_failures.store(count, Ordering::SeqCst);
    }

    /// Reads the mirrored checkpoint.
    pub fn checkpoint(&self, id: &CheckpointId) -> Option<Checkpoint> {
        self.checkpoints.lock().get(id).cloned()
    }

    /// Sets the connected flag; a disconnected mock fails every call.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Number of `cancel_outstanding` calls observed.
    pub fn cancellations(&self) -> u64 {
        self.cancellations.load(Ordering::SeqCst)
    }

    /// Cookies currently stored.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.cookies.lock().clone()
    }

    /// Extra headers currently installed.
    pub fn extra_headers(&self) -> BTreeMap<String, String> {
        self.headers.lock().clone()
    }

    /// Authenticator currently installed.
    pub fn authenticator(&self) -> Option<Authenticator> {
        self.authenticator.lock().clone()
    }

    fn ensure_connected(&self) -> ReplicationResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ReplicationError::transport_transient("not connected"))
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn changes(&self, request: ChangesRequest) -> ReplicationResult<ChangesResponse> {
        loop {
            self.ensure_connected()?;
            if self.cancelled.swap(false, Ordering::SeqCst) {
                return Err(ReplicationError::Cancelled);
            }
            if let Some(response) = self.changes.lock().pop_front() {
                return response;
            }
            if !request.wait {
                return Err(ReplicationError::Protocol(
                    "no mock changes response queued".into(),
                ));
            }
            // Quiescent long poll: park until a response is pushed.
            self.feed_wakeup.notified().await;
        }
    }

    async fn fetch_revisions(&self, _request: FetchRequest) -> ReplicationResult<FetchResponse> {
        self.ensure_connected()?;
        self.fetches
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ReplicationError::Protocol("no mock fetch response queued".into())))
    }

    async fn upload_revisions(&self, _request: UploadRequest) -> ReplicationResult<UploadResponse> {
        self.ensure_connected()?;
        self.uploads
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ReplicationError::Protocol("no mock upload response queued".into())))
    }

    async fn get_checkpoint(&self, id: &CheckpointId) -> ReplicationResult<Option<Checkpoint>> {
        self.ensure_connected()?;
        Ok(self.checkpoints.lock().get(id).cloned())
    }

    async fn put_checkpoint(&self, checkpoint: &Checkpoint) -> ReplicationResult<()> {
        self.ensure_connected()?;
        let remaining = self.checkpoint_put_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.checkpoint_put_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(ReplicationError::transport_transient(
                "injected checkpoint write failure",
            ));
        }
        self.checkpoints
            .lock()
            .insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(())
    }

    fn set_extra_headers(&self, headers: BTreeMap<String, String>) {
        *self.headers.lock() = headers;
    }

    fn set_authenticator(&self, authenticator: Option<Authenticator>) {
        *self.authenticator.lock() = authenticator;
    }

    fn set_cookie(&self, cookie: Cookie) {
        let mut cookies = self.cookies.lock();
        cookies.retain(|existing| existing.name != cookie.name);
        cookies.push(cookie);
    }

    fn delete_cookie(&self, name: &str) {
        self.cookies.lock().retain(|cookie| cookie.name != name);
    }

    fn cancel_outstanding(&self) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        self.feed_wakeup.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use litesync_protocol::{ChangeEntry, Direction, FeedScope};

    fn changes_request(wait: bool) -> ChangesRequest {
        ChangesRequest {
            since: None,
            limit: 10,
            wait,
            scope: FeedScope::default(),
        }
    }

    #[tokio::test]
    async fn scripted_responses_are_consumed_in_order() {
        let transport = MockTransport::new();
        transport.push_changes(Ok(ChangesResponse::new(
            vec![ChangeEntry::new("1", "doc-1", "1-a")],
            "1",
        )));
        transport.push_changes(Ok(ChangesResponse::new(vec![], "1")));

        let first = transport.changes(changes_request(false)).await.unwrap();
        assert_eq!(first.entries.len(), 1);
        let second = transport.changes(changes_request(false)).await.unwrap();
        assert!(second.is_caught_up());
    }

    #[tokio::test]
    async fn missing_response_without_wait_is_a_protocol_error() {
        let transport = MockTransport::new();
        let result = transport.changes(changes_request(false)).await;
        assert!(matches!(result, Err(ReplicationError::Protocol(_))));
    }

    #[tokio::test]
    async fn long_poll_parks_until_a_response_arrives() {
        let transport = std::sync::Arc::new(MockTransport::new());

        let waiter = {
            let transport = std::sync::Arc::clone(&transport);
            tokio::spawn(async move { transport.changes(changes_request(true)).await })
        };

        // Give the long poll a moment to park, then feed it.
        tokio::task::yield_now().await;
        transport.push_changes(Ok(ChangesResponse::new(
            vec![ChangeEntry::new("5", "doc-5", "1-e")],
            "5",
        )));

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.entries[0].doc_id, "doc-5");
    }

    #[tokio::test]
    async fn checkpoint_mirror_roundtrip_and_injected_failure() {
        let transport = MockTransport::new();
        let id = CheckpointId::derive("db", "remote", Direction::Pull, &FeedScope::default());

        transport.fail_checkpoint_puts(1);
        let checkpoint = Checkpoint::at(id.clone(), "9");
        assert!(transport.put_checkpoint(&checkpoint).await.is_err());
        assert!(transport.put_checkpoint(&checkpoint).await.is_ok());
        assert_eq!(
            transport.get_checkpoint(&id).await.unwrap(),
            Some(checkpoint)
        );
    }

    #[test]
    fn cookies_replace_by_name() {
        let transport = MockTransport::new();
        transport.set_cookie(Cookie::with_max_age(
            "session",
            "abc",
            "/db",
            Duration::from_secs(60),
            true,
        ));
        transport.set_cookie(Cookie::with_max_age(
            "session",
            "def",
            "/db",
            Duration::from_secs(60),
            true,
        ));

        let cookies = transport.cookies();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value, "def");

        transport.delete_cookie("session");
        assert!(transport.cookies().is_empty());
    }
}
