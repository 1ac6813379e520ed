//! Public replication facade.
//!
//! `Replicator` is a thin shell over the engine actor: every operation
//! either enqueues a trigger on the engine's serial context or reads a
//! shared snapshot. It owns listener registration and nothing else.

use crate::config::{Authenticator, Lifecycle, ReplicationConfig};
use crate::engine::{Command, Engine};
use crate::error::{ReplicationError, ReplicationResult};
use crate::event::{ChangeListener, ChangeNotifier, ListenerToken};
use crate::progress::Progress;
use crate::state::{ReplicationState, ReplicationTrigger};
use crate::storage::LocalStore;
use crate::transport::{Cookie, Transport};
use litesync_protocol::{CheckpointId, Direction};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

/// A bidirectional-capable, single-direction replication between a local
/// database and a remote document store.
///
/// A replicator lives for exactly one run: `Initial` → `Stopped`. It is not
/// reusable; a new logical replication needs a new instance, though the
/// checkpoint lineage persists across instances keyed by checkpoint ID.
///
/// All control operations are asynchronous from the caller's perspective:
/// they enqueue work on the engine's serial context and return immediately.
/// Observable effects (state changes, events) follow on that context.
///
/// Must be created inside a tokio runtime.
pub struct Replicator {
    session_id: String,
    direction: Direction,
    config: Arc<RwLock<ReplicationConfig>>,
    local: Arc<dyn LocalStore>,
    transport: Arc<dyn Transport>,
    progress: Arc<Progress>,
    notifier: Arc<ChangeNotifier>,
    tx: mpsc::UnboundedSender<Command>,
}

impl Replicator {
    /// Creates a replicator over a local store and a transport.
    pub fn new(
        local: Arc<dyn LocalStore>,
        transport: Arc<dyn Transport>,
        config: ReplicationConfig,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let direction = config.direction;
        let config = Arc::new(RwLock::new(config));
        let progress = Arc::new(Progress::new());
        let notifier = Arc::new(ChangeNotifier::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let engine = Engine::new(
            session_id.clone(),
            direction,
            Arc::clone(&config),
            Arc::clone(&local),
            Arc::clone(&transport),
            Arc::clone(&progress),
            Arc::clone(&notifier),
            tx.clone(),
            rx,
        );
        tokio::spawn(engine.run());

        Self {
            session_id,
            direction,
            config,
            local,
            transport,
            progress,
            notifier,
            tx,
        }
    }

    // ---- lifecycle -------------------------------------------------------

    /// Starts the replication, asynchronously.
    pub fn start(&self) {
        self.fire(ReplicationTrigger::Start);
    }

    /// Stops the replication gracefully, asynchronously: the in-flight
    /// batch and its checkpoint write finish first.
    pub fn stop(&self) {
        self.fire(ReplicationTrigger::StopGraceful);
    }

    /// Stops the replication immediately, aborting in-flight work. The last
    /// committed checkpoint remains authoritative.
    pub fn stop_immediate(&self) {
        self.fire(ReplicationTrigger::StopImmediate);
    }

    /// Suspends network use, asynchronously.
    pub fn go_offline(&self) {
        self.fire(ReplicationTrigger::GoOffline);
    }

    /// Resumes from the last committed checkpoint, asynchronously.
    pub fn go_online(&self) {
        self.fire(ReplicationTrigger::GoOnline);
    }

    /// True while the replication is running. A continuous replication
    /// never leaves `Running` on its own; idle waiting counts as running.
    pub fn is_running(&self) -> bool {
        self.progress.state() == ReplicationState::Running
    }

    /// Current lifecycle state snapshot.
    pub fn state(&self) -> ReplicationState {
        self.progress.state()
    }

    fn fire(&self, trigger: ReplicationTrigger) {
        // A send failure means the worker already stopped; triggers after
        // Stopped are no-ops by contract.
        let _ = self.tx.send(Command::Fire(trigger));
    }

    // ---- configuration ---------------------------------------------------

    /// Is this replication continuous?
    pub fn is_continuous(&self) -> bool {
        self.config.read().is_continuous()
    }

    /// Sets whether this replication is continuous. Rejected while active.
    pub fn set_continuous(&self, continuous: bool) -> ReplicationResult<()> {
        self.ensure_inactive()?;
        self.config.write().lifecycle = if continuous {
            Lifecycle::Continuous
        } else {
            Lifecycle::Oneshot
        };
        Ok(())
    }

    /// The authenticator used against the remote.
    pub fn authenticator(&self) -> Option<Authenticator> {
        self.config.read().authenticator.clone()
    }

    /// Sets the authenticator. Rejected while active.
    pub fn set_authenticator(&self, authenticator: Authenticator) -> ReplicationResult<()> {
        self.ensure_inactive()?;
        self.config.write().authenticator = Some(authenticator);
        Ok(())
    }

    /// Name of the filter function restricting this replication.
    pub fn filter(&self) -> Option<String> {
        self.config.read().scope.filter.clone()
    }

    /// Sets the filter function name. Rejected while active.
    pub fn set_filter(&self, filter: impl Into<String>) -> ReplicationResult<()> {
        self.ensure_inactive()?;
        self.config.write().scope.filter = Some(filter.into());
        Ok(())
    }

    /// Parameters passed to the filter function.
    pub fn filter_params(&self) -> BTreeMap<String, serde_json::Value> {
        self.config.read().scope.filter_params.clone()
    }

    /// Sets the filter parameters. Rejected while active.
    pub fn set_filter_params(
        &self,
        params: BTreeMap<String, serde_json::Value>,
    ) -> ReplicationResult<()> {
        self.ensure_inactive()?;
        self.config.write().scope.filter_params = params;
        Ok(())
    }

    /// Sets the explicit document-ID allowlist. Rejected while active.
    pub fn set_doc_ids(&self, doc_ids: Vec<String>) -> ReplicationResult<()> {
        self.ensure_inactive()?;
        self.config.write().scope.doc_ids = Some(doc_ids);
        Ok(())
    }

    /// The channel allowlist; `None` means all channels.
    pub fn channels(&self) -> Option<Vec<String>> {
        self.config.read().scope.channels.clone()
    }

    /// Sets the channel allowlist. Rejected while active.
    pub fn set_channels(&self, channels: Vec<String>) -> ReplicationResult<()> {
        self.ensure_inactive()?;
        self.config.write().scope.channels = Some(channels);
        Ok(())
    }

    /// Extra HTTP headers sent with every request.
    pub fn headers(&self) -> BTreeMap<String, String> {
        self.config.read().headers.clone()
    }

    /// Sets the extra HTTP headers. Rejected while active.
    pub fn set_headers(&self, headers: BTreeMap<String, String>) -> ReplicationResult<()> {
        self.ensure_inactive()?;
        self.config.write().headers = headers;
        Ok(())
    }

    fn ensure_inactive(&self) -> ReplicationResult<()> {
        match self.progress.state() {
            ReplicationState::Initial | ReplicationState::Stopped => Ok(()),
            state => Err(ReplicationError::Busy { state }),
        }
    }

    // ---- cookies ---------------------------------------------------------

    /// Stores an HTTP cookie valid for `max_age` from now. The cookie jar
    /// belongs to the transport, so this is legal at any time.
    pub fn set_cookie(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
        path: impl Into<String>,
        max_age: Duration,
        secure: bool,
    ) {
        self.transport
            .set_cookie(Cookie::with_max_age(name, value, path, max_age, secure));
    }

    /// Stores an HTTP cookie valid until `expires`.
    pub fn set_cookie_expiring(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
        path: impl Into<String>,
        expires: SystemTime,
        secure: bool,
    ) {
        self.transport
            .set_cookie(Cookie::expiring_at(name, value, path, expires, secure));
    }

    /// Deletes an HTTP cookie by name.
    pub fn delete_cookie(&self, name: &str) {
        self.transport.delete_cookie(name);
    }

    // ---- listeners -------------------------------------------------------

    /// Registers a change listener; it is invoked for every state
    /// transition and counter update.
    pub fn add_change_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerToken {
        self.notifier.add(listener)
    }

    /// Removes a previously registered listener.
    pub fn remove_change_listener(&self, token: ListenerToken) {
        self.notifier.remove(token);
    }

    // ---- observation -----------------------------------------------------

    /// The error status of the replication, or `None` if there have been no
    /// errors since the last fully successful batch.
    pub fn last_error(&self) -> Option<Arc<ReplicationError>> {
        self.progress.last_error()
    }

    /// Total number of changes discovered so far.
    pub fn changes_count(&self) -> u64 {
        self.progress.changes_count()
    }

    /// Number of changes applied so far.
    pub fn completed_changes_count(&self) -> u64 {
        self.progress.completed_changes_count()
    }

    /// Is this a pull replication?
    pub fn is_pull(&self) -> bool {
        self.direction.is_pull()
    }

    /// Replication direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The local database this replication reads or writes.
    pub fn local_database(&self) -> Arc<dyn LocalStore> {
        Arc::clone(&self.local)
    }

    /// The remote endpoint URL.
    pub fn remote_url(&self) -> String {
        self.config.read().remote_url.clone()
    }

    /// Unique ID of this replication session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The checkpoint lineage this replication reads and advances, derived
    /// from the local database identity, remote endpoint, direction, and
    /// document scope.
    pub fn checkpoint_id(&self) -> CheckpointId {
        let config = self.config.read();
        CheckpointId::derive(
            &self.local.uuid(),
            &config.remote_url,
            config.direction,
            &config.scope,
        )
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        // Best effort: a dropped replicator must not leave its worker
        // long-polling forever.
        let _ = self.tx.send(Command::Fire(ReplicationTrigger::StopImmediate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::transport::MockTransport;

    fn make_replicator(direction: Direction) -> Replicator {
        let local = Arc::new(MemoryStore::new("local-db"));
        let transport = Arc::new(MockTransport::new());
        Replicator::new(
            local,
            transport,
            ReplicationConfig::new("https://sync.example.com/db", direction),
        )
    }

    #[tokio::test]
    async fn initial_snapshot() {
        let replicator = make_replicator(Direction::Pull);
        assert!(!replicator.is_running());
        assert_eq!(replicator.state(), ReplicationState::Initial);
        assert!(replicator.is_pull());
        assert!(!replicator.is_continuous());
        assert_eq!(replicator.changes_count(), 0);
        assert_eq!(replicator.completed_changes_count(), 0);
        assert!(replicator.last_error().is_none());
        assert_eq!(replicator.remote_url(), "https://sync.example.com/db");
    }

    #[tokio::test]
    async fn checkpoint_id_tracks_configuration() {
        let replicator = make_replicator(Direction::Pull);
        let unfiltered = replicator.checkpoint_id();

        replicator.set_channels(vec!["news".into()]).unwrap();
        let filtered = replicator.checkpoint_id();
        assert_ne!(unfiltered, filtered);

        // Same configuration derives the same lineage.
        assert_eq!(filtered, replicator.checkpoint_id());
    }

    #[tokio::test]
    async fn configuration_is_mutable_before_start() {
        let replicator = make_replicator(Direction::Push);
        replicator.set_continuous(true).unwrap();
        assert!(replicator.is_continuous());

        replicator.set_filter("by_owner").unwrap();
        assert_eq!(replicator.filter(), Some("by_owner".to_string()));

        let mut headers = BTreeMap::new();
        headers.insert("X-Client".to_string(), "litesync".to_string());
        replicator.set_headers(headers.clone()).unwrap();
        assert_eq!(replicator.headers(), headers);
    }

    #[tokio::test]
    async fn cookies_pass_through_to_the_transport() {
        let local = Arc::new(MemoryStore::new("local-db"));
        let transport = Arc::new(MockTransport::new());
        let replicator = Replicator::new(
            local,
            Arc::clone(&transport) as Arc<dyn Transport>,
            ReplicationConfig::new("https://sync.example.com/db", Direction::Pull),
        );

        replicator.set_cookie("session", "abc", "/db", Duration::from_secs(60), true);
        assert_eq!(transport.cookies().len(), 1);

        replicator.delete_cookie("session");
        assert!(transport.cookies().is_empty());
    }
}
