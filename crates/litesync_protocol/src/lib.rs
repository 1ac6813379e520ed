//! # litesync Protocol
//!
//! Replication protocol types for litesync.
//!
//! This crate provides:
//! - `Revision` and sequence-token types for replicated documents
//! - Change-feed entries and requests
//! - `Checkpoint` documents and deterministic checkpoint identity
//! - Fetch/upload messages with per-revision statuses
//!
//! This is a pure protocol crate with no I/O operations. All types are
//! serde-serializable; the wire format against a document-store server
//! is JSON.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changes;
mod checkpoint;
mod messages;
mod revision;

pub use changes::{ChangeEntry, ChangesRequest, ChangesResponse, FeedScope};
pub use checkpoint::{Checkpoint, CheckpointId, Direction};
pub use messages::{FetchRequest, FetchResponse, RevisionStatus, UploadRequest, UploadResponse};
pub use revision::{Revision, RevisionId, SequenceToken};
