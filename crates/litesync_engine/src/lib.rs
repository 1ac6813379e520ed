//! # litesync Engine
//!
//! Replication lifecycle engine for litesync.
//!
//! This crate provides:
//! - The trigger-driven replication state machine
//! - Pull and push direction engines with bounded batching
//! - Durable checkpoints with a remote mirror
//! - Retry with exponential backoff
//! - Change-event fan-out to listeners
//! - The public `Replicator` facade
//!
//! ## Architecture
//!
//! Each replication owns a single serial execution context: a worker task
//! fed by a mailbox. External calls (`start`, `stop`, `go_offline`, ...)
//! enqueue a trigger and return immediately; network I/O runs in spawned
//! sub-tasks whose completions re-enter the mailbox. This linearizes every
//! state transition and engine mutation without fine-grained locking.
//!
//! The local database and the HTTP layer are collaborators behind the
//! [`LocalStore`] and [`Transport`] traits; the engine defines only how it
//! calls into them.
//!
//! ## Key Invariants
//!
//! - The engine only occupies states Initial, Running, Offline, Stopped
//! - Illegal triggers are rejected no-ops, never errors
//! - `completed_changes_count <= changes_count` at every observable instant
//! - The local checkpoint is authoritative; the remote mirror is best-effort
//! - A graceful stop drains the in-flight batch and its checkpoint write
//!   before the Stopped transition fires

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod engine;
mod error;
mod event;
mod progress;
mod pull;
mod push;
mod replicator;
mod retry;
mod state;
mod storage;
mod transport;

pub use checkpoint::CheckpointStore;
pub use config::{Authenticator, CheckpointPolicy, Lifecycle, ReplicationConfig, RetryConfig};
pub use error::{ReplicationError, ReplicationResult};
pub use event::{ChangeEvent, ChangeListener, ChangeNotifier, ListenerToken};
pub use replicator::Replicator;
pub use retry::RetryScheduler;
pub use state::{ReplicationState, ReplicationTrigger, StateMachine, Transition};
pub use storage::{LocalStore, MemoryStore, StoreError, StoreResult};
pub use transport::{Cookie, CookieExpiry, MockTransport, Transport};

pub use litesync_protocol::Direction;
