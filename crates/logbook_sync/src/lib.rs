#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Cross-instance wake signaling
pub mod channel;

/// Logical clocks for causal ordering
pub mod clock;

/// Durable space credentials and record-meta cache
pub mod credentials;

/// Optional end-to-end encryption envelope
pub mod envelope;

/// Error (common error types)
pub mod error;

/// Cross-instance leader election
pub mod leader;

/// Per-record-type conflict resolvers
pub mod merge;

/// Durable queue of pending remote writes
pub mod outbox;

/// Pairing links for connecting additional devices
pub mod pairing;

/// The record shapes sync knows how to merge
pub mod records;

/// Remote sync protocol client
pub mod remote;

/// Record store adapter
pub mod store;

/// The sync engine
pub mod sync;

pub use error::{Result, SyncError};
pub use sync::{PassOutcome, SyncConfig, SyncEngine, SyncState, SyncStatus};
