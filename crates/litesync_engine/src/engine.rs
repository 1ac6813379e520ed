//! The per-direction replication engine actor.
//!
//! One engine owns one replication run. Every trigger, I/O completion, and
//! checkpoint write funnels through a single mailbox-driven worker, so all
//! state-machine transitions and engine-internal mutations are linearized
//! without fine-grained locking. Network work runs in spawned sub-tasks
//! whose completions re-enter the mailbox, preserving order with any
//! triggers enqueued in between.

use crate::checkpoint::CheckpointStore;
use crate::config::{Lifecycle, ReplicationConfig};
use crate::error::{ReplicationError, ReplicationResult};
use crate::event::{ChangeEvent, ChangeNotifier};
use crate::progress::Progress;
use crate::pull::Puller;
use crate::push::Pusher;
use crate::retry::RetryScheduler;
use crate::state::{ReplicationState, ReplicationTrigger, StateMachine, Transition};
use crate::storage::LocalStore;
use crate::transport::Transport;
use async_trait::async_trait;
use litesync_protocol::{
    ChangeEntry, ChangesResponse, Checkpoint, CheckpointId, Direction, RevisionStatus,
    SequenceToken,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One direction's batch work, behind a trait so the engine base stays
/// direction-agnostic.
#[async_trait]
pub(crate) trait Driver: Send + Sync {
    /// Discovers the next bounded batch of pending changes. With `wait`
    /// set, a caught-up feed blocks until changes appear.
    async fn discover(
        &self,
        since: Option<SequenceToken>,
        wait: bool,
    ) -> ReplicationResult<ChangesResponse>;

    /// Transfers one batch, returning per-revision outcomes.
    async fn transfer(&self, entries: &[ChangeEntry]) -> ReplicationResult<Vec<RevisionStatus>>;
}

/// Messages processed on the engine's serial context.
pub(crate) enum Command {
    /// Fire a state-machine trigger.
    Fire(ReplicationTrigger),
    /// Checkpoint resolution finished.
    CheckpointReady(ReplicationResult<Checkpoint>),
    /// Change discovery finished.
    ChangesReady(ReplicationResult<ChangesResponse>),
    /// Batch transfer finished.
    BatchDone {
        /// The batch that was transferred.
        entries: Vec<ChangeEntry>,
        /// Per-revision outcomes, or the failure that sank the attempt.
        result: ReplicationResult<Vec<RevisionStatus>>,
    },
}

/// What an armed retry timer should re-attempt.
enum RetryIntent {
    /// Re-transfer the previously failed revisions.
    Batch,
    /// Re-run change discovery.
    Discovery,
}

/// Severity of a failure, per the error taxonomy.
enum Failure {
    Transient,
    FatalGraceful,
    FatalImmediate,
}

pub(crate) struct Engine {
    session_id: String,
    direction: Direction,
    config: Arc<RwLock<ReplicationConfig>>,
    local: Arc<dyn LocalStore>,
    transport: Arc<dyn Transport>,
    progress: Arc<Progress>,
    notifier: Arc<ChangeNotifier>,
    machine: StateMachine,
    retry: RetryScheduler,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,

    // Populated when the run starts.
    driver: Option<Arc<dyn Driver>>,
    checkpoints: Option<Arc<CheckpointStore>>,
    lifecycle: Lifecycle,
    max_protocol_failures: u32,

    // Run-state owned exclusively by the worker.
    position: Option<SequenceToken>,
    position_loaded: bool,
    loader: Option<JoinHandle<()>>,
    discovery: Option<JoinHandle<()>>,
    batch: Option<JoinHandle<()>>,
    batch_last_seq: Option<SequenceToken>,
    failed_entries: Vec<ChangeEntry>,
    retry_intent: Option<RetryIntent>,
    protocol_failures: u32,
    stop_after_drain: bool,
    caught_up: bool,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session_id: String,
        direction: Direction,
        config: Arc<RwLock<ReplicationConfig>>,
        local: Arc<dyn LocalStore>,
        transport: Arc<dyn Transport>,
        progress: Arc<Progress>,
        notifier: Arc<ChangeNotifier>,
        tx: mpsc::UnboundedSender<Command>,
        rx: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let retry = RetryScheduler::new(config.read().retry.clone());
        Self {
            session_id,
            direction,
            config,
            local,
            transport,
            progress,
            notifier,
            machine: StateMachine::new(),
            retry,
            tx,
            rx,
            driver: None,
            checkpoints: None,
            lifecycle: Lifecycle::Oneshot,
            max_protocol_failures: 3,
            position: None,
            position_loaded: false,
            loader: None,
            discovery: None,
            batch: None,
            batch_last_seq: None,
            failed_entries: Vec::new(),
            retry_intent: None,
            protocol_failures: 0,
            stop_after_drain: false,
            caught_up: false,
        }
    }

    /// Runs the serial context until the machine reaches `Stopped` or every
    /// command sender is gone.
    pub(crate) async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Fire(trigger) => self.handle_fire(trigger),
                Command::CheckpointReady(result) => self.handle_checkpoint_ready(result),
                Command::ChangesReady(result) => self.handle_changes_ready(result),
                Command::BatchDone { entries, result } => self.handle_batch_done(entries, result),
            }
            if self.machine.current() == ReplicationState::Stopped {
                break;
            }
        }
        self.abort_io();
        tracing::debug!(session = %self.session_id, "engine worker exited");
    }

    // ---- trigger handling ------------------------------------------------

    fn handle_fire(&mut self, trigger: ReplicationTrigger) {
        use ReplicationTrigger::*;
        match trigger {
            Start => self.handle_start(),
            GoOffline => self.handle_go_offline(),
            GoOnline => self.handle_go_online(),
            RetryFailedRevs => self.handle_retry_fired(),
            StopGraceful => self.handle_stop_graceful(),
            StopImmediate => self.handle_stop_immediate(),
            WaitingForChanges | GotChanges | ProcessedChanges => {
                self.do_transition(trigger, None);
            }
        }
    }

    fn handle_start(&mut self) {
        if !self.do_transition(ReplicationTrigger::Start, None) {
            return;
        }
        let config = self.config.read().clone();
        self.lifecycle = config.lifecycle;
        self.max_protocol_failures = config.max_protocol_failures;
        self.retry = RetryScheduler::new(config.retry.clone());
        self.transport.set_extra_headers(config.headers.clone());
        self.transport.set_authenticator(config.authenticator.clone());

        let id = CheckpointId::derive(
            &self.local.uuid(),
            &config.remote_url,
            config.direction,
            &config.scope,
        );
        let checkpoints = Arc::new(CheckpointStore::new(
            id,
            Arc::clone(&self.local),
            Arc::clone(&self.transport),
            config.checkpoint_policy,
        ));
        self.checkpoints = Some(Arc::clone(&checkpoints));

        let driver: Arc<dyn Driver> = match config.direction {
            Direction::Pull => Arc::new(Puller::new(
                Arc::clone(&self.transport),
                Arc::clone(&self.local),
                config.scope.clone(),
                config.batch_size,
            )),
            Direction::Push => Arc::new(Pusher::new(
                Arc::clone(&self.local),
                Arc::clone(&self.transport),
                config.scope.clone(),
                config.batch_size,
            )),
        };
        self.driver = Some(driver);

        tracing::info!(
            session = %self.session_id,
            direction = %self.direction,
            remote = %config.remote_url,
            "replication starting"
        );

        let tx = self.tx.clone();
        self.loader = Some(tokio::spawn(async move {
            let result = checkpoints.load().await;
            let _ = tx.send(Command::CheckpointReady(result));
        }));
    }

    fn handle_go_offline(&mut self) {
        if !self.do_transition(ReplicationTrigger::GoOffline, None) {
            return;
        }
        // Cancel outstanding requests; un-checkpointed work in the aborted
        // batch will be re-fetched after GoOnline. An armed retry timer
        // stays live: RetryFailedRevs is legal from Offline.
        self.abort_discovery();
        self.abort_batch();
        self.transport.cancel_outstanding();
        tracing::info!(session = %self.session_id, "replication offline");
        if self.stop_after_drain {
            // A graceful stop was waiting on the batch this just aborted;
            // nothing is left to drain.
            self.stop_after_drain = false;
            self.handle_stop_graceful();
        }
    }

    fn handle_go_online(&mut self) {
        if !self.do_transition(ReplicationTrigger::GoOnline, None) {
            return;
        }
        // Discovery resumes from the last committed checkpoint and will
        // re-find anything a pending retry would have re-sent.
        self.retry.cancel();
        self.retry_intent = None;
        self.failed_entries.clear();
        self.batch_last_seq = None;
        self.caught_up = false;
        tracing::info!(session = %self.session_id, "replication back online");
        if self.position_loaded {
            self.begin_discovery();
        }
    }

    fn handle_retry_fired(&mut self) {
        let Some(intent) = self.retry_intent.take() else {
            // Timer outlived its purpose (no retry intent left): no-op.
            return;
        };
        if !self.do_transition(ReplicationTrigger::RetryFailedRevs, None) {
            return;
        }
        self.abort_discovery();
        match intent {
            RetryIntent::Discovery => self.begin_discovery(),
            RetryIntent::Batch => {
                if self.failed_entries.is_empty() {
                    self.begin_discovery();
                } else {
                    let entries = self.failed_entries.clone();
                    tracing::info!(
                        session = %self.session_id,
                        revisions = entries.len(),
                        attempt = self.retry.attempt(),
                        "retrying failed revisions"
                    );
                    self.spawn_batch(entries);
                }
            }
        }
    }

    fn handle_stop_graceful(&mut self) {
        if self.machine.current() == ReplicationState::Stopped {
            return;
        }
        if self.batch.is_some() {
            // Drain: let the in-flight batch and its checkpoint write
            // finish; the Stopped transition fires from the batch
            // completion path.
            self.stop_after_drain = true;
            self.abort_discovery();
            return;
        }
        self.abort_io();
        self.retry.cancel();
        self.retry_intent = None;
        self.do_transition(ReplicationTrigger::StopGraceful, None);
    }

    fn handle_stop_immediate(&mut self) {
        if self.machine.current() == ReplicationState::Stopped {
            return;
        }
        self.abort_io();
        self.transport.cancel_outstanding();
        self.retry.cancel();
        self.retry_intent = None;
        self.stop_after_drain = false;
        self.do_transition(ReplicationTrigger::StopImmediate, None);
    }

    // ---- I/O completions -------------------------------------------------

    fn handle_checkpoint_ready(&mut self, result: ReplicationResult<Checkpoint>) {
        self.loader = None;
        match result {
            Ok(checkpoint) => {
                self.position = checkpoint.last_sequence;
                self.position_loaded = true;
                tracing::debug!(
                    session = %self.session_id,
                    position = ?self.position,
                    "resuming from checkpoint"
                );
                if self.machine.current() == ReplicationState::Running {
                    self.begin_discovery();
                }
            }
            // Only a local read can fail checkpoint resolution; remote
            // mirror failures degrade to "absent" inside the store.
            Err(error) => {
                let shared = self.progress.record_error(error);
                self.emit(None, Some(shared));
                self.handle_stop_immediate();
            }
        }
    }

    fn handle_changes_ready(&mut self, result: ReplicationResult<ChangesResponse>) {
        self.discovery = None;
        if self.machine.current() != ReplicationState::Running {
            return; // stale completion raced a stop or offline
        }
        if self.batch.is_some() {
            // A stale discovery raced a retry-spawned batch; the next
            // discovery after the batch settles re-covers these entries.
            return;
        }
        match result {
            Ok(response) => {
                self.protocol_failures = 0;
                if response.is_caught_up() {
                    if !self.caught_up {
                        self.caught_up = true;
                        self.do_transition(ReplicationTrigger::WaitingForChanges, None);
                    }
                    match self.lifecycle {
                        Lifecycle::Oneshot => self.handle_stop_graceful(),
                        // Caught up: the next discovery long-polls until
                        // the feed produces something.
                        Lifecycle::Continuous => self.begin_discovery(),
                    }
                } else {
                    self.caught_up = false;
                    self.do_transition(ReplicationTrigger::GotChanges, None);
                    self.progress.add_discovered(response.entries.len() as u64);
                    self.emit(None, None);
                    self.batch_last_seq = Some(response.last_seq.clone());
                    self.spawn_batch(response.entries);
                }
            }
            Err(error) => self.on_io_error(error, RetryIntent::Discovery),
        }
    }

    fn handle_batch_done(
        &mut self,
        entries: Vec<ChangeEntry>,
        result: ReplicationResult<Vec<RevisionStatus>>,
    ) {
        self.batch = None;
        match self.machine.current() {
            ReplicationState::Stopped | ReplicationState::Offline => return,
            _ => {}
        }

        match result {
            Ok(statuses) => self.settle_batch(entries, statuses),
            Err(error) => {
                self.failed_entries = entries;
                let class = self.classify(&error);
                let shared = self.progress.record_error(error);
                self.emit(None, Some(Arc::clone(&shared)));
                if self.stop_after_drain {
                    // The drained batch failed; there is nothing to
                    // checkpoint, so stop now.
                    self.handle_stop_graceful();
                    return;
                }
                match class {
                    Failure::Transient => self.arm_retry(RetryIntent::Batch),
                    Failure::FatalGraceful => self.handle_stop_graceful(),
                    Failure::FatalImmediate => self.handle_stop_immediate(),
                }
            }
        }
    }

    /// Settles a completed transfer: counts outcomes, advances the
    /// checkpoint on full success, schedules a retry on partial success.
    fn settle_batch(&mut self, entries: Vec<ChangeEntry>, statuses: Vec<RevisionStatus>) {
        let mut by_doc: BTreeMap<&str, Vec<&RevisionStatus>> = BTreeMap::new();
        for status in &statuses {
            by_doc.entry(status.doc_id.as_str()).or_default().push(status);
        }

        let mut applied = 0u64;
        let mut skipped = 0u64;
        let mut failed = Vec::new();
        for entry in &entries {
            match by_doc.get(entry.doc_id.as_str()) {
                Some(statuses) if statuses.iter().all(|status| status.is_accepted()) => {
                    applied += 1;
                }
                Some(statuses) if statuses.iter().any(|status| status.is_transient()) => {
                    failed.push(entry.clone());
                }
                Some(statuses) => {
                    // Permanently rejected (e.g. forbidden): skipping is the
                    // only way this replication can ever pass the document.
                    for status in statuses {
                        tracing::warn!(
                            doc = %status.doc_id,
                            rev = %status.rev_id,
                            code = status.status,
                            "revision permanently rejected; skipping"
                        );
                    }
                    skipped += 1;
                }
                None => {
                    tracing::warn!(doc = %entry.doc_id, "no outcome for revision; skipping");
                    skipped += 1;
                }
            }
        }

        self.progress.add_completed(applied + skipped);
        self.emit(None, None);

        if !failed.is_empty() {
            tracing::warn!(
                session = %self.session_id,
                failed = failed.len(),
                applied,
                "batch partially applied"
            );
            self.failed_entries = failed;
            if self.stop_after_drain {
                self.handle_stop_graceful();
                return;
            }
            let shared = self.progress.record_error(ReplicationError::transport_transient(
                format!("{} revisions failed transiently", self.failed_entries.len()),
            ));
            self.emit(None, Some(shared));
            self.arm_retry(RetryIntent::Batch);
            return;
        }

        // Fully successful batch: commit progress before reporting it.
        self.failed_entries.clear();
        self.retry.reset();
        self.progress.clear_error();
        if let (Some(store), Some(token)) = (self.checkpoints.clone(), self.batch_last_seq.take()) {
            match store.save_local(token) {
                Ok(checkpoint) => {
                    self.position = checkpoint.last_sequence.clone();
                    // Mirror off the serial context; a mirror failure is
                    // non-fatal and retried on the next save.
                    tokio::spawn(async move { store.mirror(&checkpoint).await });
                }
                Err(error) => {
                    let shared = self.progress.record_error(error);
                    self.emit(None, Some(shared));
                    self.handle_stop_immediate();
                    return;
                }
            }
        }
        self.do_transition(ReplicationTrigger::ProcessedChanges, None);

        if self.stop_after_drain {
            self.handle_stop_graceful();
        } else {
            self.begin_discovery();
        }
    }

    // ---- error routing ---------------------------------------------------

    fn on_io_error(&mut self, error: ReplicationError, intent: RetryIntent) {
        let class = self.classify(&error);
        let shared = self.progress.record_error(error);
        self.emit(None, Some(Arc::clone(&shared)));
        match class {
            Failure::Transient => self.arm_retry(intent),
            Failure::FatalGraceful => {
                tracing::warn!(session = %self.session_id, error = %shared, "fatal failure; stopping");
                self.handle_stop_graceful();
            }
            Failure::FatalImmediate => {
                tracing::error!(
                    session = %self.session_id,
                    error = %shared,
                    "local failure; stopping immediately"
                );
                self.handle_stop_immediate();
            }
        }
    }

    fn classify(&mut self, error: &ReplicationError) -> Failure {
        match error {
            ReplicationError::Storage(_) => Failure::FatalImmediate,
            ReplicationError::Auth(_) => Failure::FatalGraceful,
            ReplicationError::Protocol(_) => {
                self.protocol_failures += 1;
                if self.protocol_failures >= self.max_protocol_failures {
                    Failure::FatalGraceful
                } else {
                    Failure::Transient
                }
            }
            ReplicationError::Transport { transient: true, .. } | ReplicationError::Cancelled => {
                Failure::Transient
            }
            _ => Failure::FatalGraceful,
        }
    }

    fn arm_retry(&mut self, intent: RetryIntent) {
        self.retry_intent = Some(intent);
        let tx = self.tx.clone();
        let armed = self.retry.arm(move || {
            let _ = tx.send(Command::Fire(ReplicationTrigger::RetryFailedRevs));
        });
        match armed {
            Some(delay) => {
                tracing::debug!(
                    session = %self.session_id,
                    ?delay,
                    attempt = self.retry.attempt(),
                    "retry armed"
                );
            }
            None => {
                self.retry_intent = None;
                let shared = self.progress.record_error(ReplicationError::RetryExhausted {
                    attempts: self.retry.attempt(),
                });
                self.emit(None, Some(shared));
                self.handle_stop_graceful();
            }
        }
    }

    // ---- plumbing --------------------------------------------------------

    fn begin_discovery(&mut self) {
        if self.batch.is_some() {
            return; // back-pressure: one batch at a time
        }
        let Some(driver) = self.driver.clone() else {
            return;
        };
        self.abort_discovery();
        // The first pass after start, resume, or a processed batch polls
        // without waiting so a caught-up feed is reported promptly; once
        // idle, discovery parks on the feed.
        let wait = self.lifecycle == Lifecycle::Continuous && self.caught_up;
        let since = self.position.clone();
        let tx = self.tx.clone();
        self.discovery = Some(tokio::spawn(async move {
            let result = driver.discover(since, wait).await;
            let _ = tx.send(Command::ChangesReady(result));
        }));
    }

    fn spawn_batch(&mut self, entries: Vec<ChangeEntry>) {
        let Some(driver) = self.driver.clone() else {
            return;
        };
        let tx = self.tx.clone();
        self.batch = Some(tokio::spawn(async move {
            let result = driver.transfer(&entries).await;
            let _ = tx.send(Command::BatchDone { entries, result });
        }));
    }

    fn do_transition(
        &mut self,
        trigger: ReplicationTrigger,
        error: Option<Arc<ReplicationError>>,
    ) -> bool {
        match self.machine.fire(trigger) {
            Some(transition) => {
                self.progress.set_state(transition.to);
                tracing::debug!(
                    session = %self.session_id,
                    from = ?transition.from,
                    to = ?transition.to,
                    trigger = ?transition.trigger,
                    "state transition"
                );
                let error = error.or_else(|| {
                    if transition.to == ReplicationState::Stopped {
                        self.progress.last_error()
                    } else {
                        None
                    }
                });
                self.emit(Some(transition), error);
                true
            }
            None => {
                tracing::trace!(
                    session = %self.session_id,
                    ?trigger,
                    state = ?self.machine.current(),
                    "trigger rejected"
                );
                false
            }
        }
    }

    fn emit(&self, transition: Option<Transition>, error: Option<Arc<ReplicationError>>) {
        let event = ChangeEvent {
            source: self.session_id.clone(),
            direction: self.direction,
            transition,
            changes_count: self.progress.changes_count(),
            completed_changes_count: self.progress.completed_changes_count(),
            error,
        };
        self.notifier.notify(&event);
    }

    fn abort_discovery(&mut self) {
        if let Some(task) = self.discovery.take() {
            task.abort();
        }
    }

    fn abort_batch(&mut self) {
        if let Some(task) = self.batch.take() {
            task.abort();
        }
    }

    fn abort_io(&mut self) {
        if let Some(task) = self.loader.take() {
            task.abort();
        }
        self.abort_discovery();
        self.abort_batch();
    }
}
