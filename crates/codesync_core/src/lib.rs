#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Configuration options
pub mod config;

/// Edit coordinator (debounced snapshot-to-update pipeline)
pub mod coordinator;

/// Replicated text documents and the sync protocol
pub mod crdt;

/// Minimal diff and change application
pub mod diff;

/// Error (common error types)
pub mod error;

/// Document and protocol events
pub mod events;

/// Host-side driver
pub mod host;

/// Remote-surface driver
pub mod surface;

/// Outbound message transport
pub mod transport;

pub use crdt::{DocManager, ResourceId, SyncManager, SyncMessage, SyncState, TextDoc};
pub use diff::{TextChange, apply_changes, compute_changes};
pub use error::{Result, SyncError};
