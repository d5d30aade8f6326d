//! Sync engine module.
//!
//! The engine orchestrates everything the rest of this crate provides:
//! it pulls the remote index and merges newer records in, drains the outbox
//! under optimistic concurrency, resolves push conflicts through the record
//! resolvers, schedules retries with exponential backoff, and reports status
//! for the UI to render.
//!
//! # Architecture
//!
//! ```text
//!    Remote space (HTTP or injected RemoteStore)
//!           ^v
//!      SyncEngine (pull/merge, push, conflict handling, backoff)
//!           ^v
//!    Outbox + credentials + merge resolvers + envelope
//!           ^v
//!      RecordStore adapter (shared with other instances)
//! ```
//!
//! Local edits are never blocked by sync: the engine only ever runs in the
//! background, and every failure leaves the outbox intact for a later pass.

mod backoff;
mod engine;

pub use backoff::Backoff;
pub use engine::{RemoteFactory, SyncEngine};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::leader::LeaderConfig;
use crate::remote::DEFAULT_ENDPOINT;

/// High-level engine state, advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Nothing to do, or sync is disabled/not leader.
    Idle,
    /// A pass is currently running.
    Syncing,
    /// Connectivity is known to be absent.
    Offline,
    /// The last pass failed; a retry is scheduled.
    Error,
}

/// Status snapshot exposed for the UI.
///
/// Purely advisory: local editing never depends on any of these fields.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// Current engine state.
    pub state: SyncState,
    /// Number of queued pending writes.
    pub pending: usize,
    /// Conflicts resolved since the engine was created.
    pub conflicts: u64,
    /// Completion time of the last fully successful pass.
    pub last_sync: Option<DateTime<Utc>>,
    /// Time of the most recent conflict resolution.
    pub last_conflict: Option<DateTime<Utc>>,
    /// Message from the last failure, cleared on success.
    pub last_error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            pending: 0,
            conflicts: 0,
            last_sync: None,
            last_conflict: None,
            last_error: None,
        }
    }
}

/// Callback invoked with every status change.
pub type StatusCallback = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Master switch; a disabled engine never talks to the network.
    pub enabled: bool,

    /// Run a pass as soon as leadership is acquired.
    pub sync_on_start: bool,

    /// Endpoint used for provisioning and as the space's home.
    pub endpoint: String,

    /// Quiet period between a local enqueue and the triggered pass,
    /// coalescing bursts of edits.
    pub debounce: Duration,

    /// Leader election timing.
    pub leader: LeaderConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_on_start: true,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            debounce: Duration::from_millis(1500),
            leader: LeaderConfig::default(),
        }
    }
}

/// What one sync pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Whether a pass actually ran (false when skipped: not leader,
    /// offline, disabled, or coalesced into an already-running pass).
    pub ran: bool,
    /// Remote records fetched and applied/merged locally.
    pub pulled: usize,
    /// Pending writes pushed cleanly.
    pub pushed: usize,
    /// Pending writes that needed conflict resolution.
    pub merged: usize,
}

impl PassOutcome {
    pub(crate) fn skipped() -> Self {
        Self::default()
    }
}
