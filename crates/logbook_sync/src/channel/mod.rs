//! Cross-instance wake signaling.
//!
//! Instances of the app on one device (tabs, windows, processes) coordinate
//! through the shared store, but waiting for the next heartbeat or poll makes
//! convergence slow. A [`WakeChannel`] carries best-effort hints between
//! instances: "the leader lock may have changed", "the outbox has new work".
//! Receipt of a message is only ever a reason to re-check shared state,
//! never an authoritative statement about it.
//!
//! Two implementations are provided, selected at construction:
//!
//! - [`LocalWakeChannel`]: in-process broadcast for hosts with a real
//!   broadcast capability.
//! - [`StorePollingChannel`]: writes messages to a reserved store key and
//!   polls it, for hosts where only the shared store is available.

mod local;
mod polling;

pub use local::LocalWakeChannel;
pub use polling::StorePollingChannel;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// What a wake message is hinting about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeKind {
    /// Leadership may have changed; re-evaluate the lock.
    Leader,
    /// The outbox has pending work; the leader should schedule a pass.
    Outbox,
}

/// A best-effort wake hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeMessage {
    /// Hint kind.
    #[serde(rename = "type")]
    pub kind: WakeKind,
    /// Unique message id (used by polling receivers to skip duplicates).
    pub id: String,
    /// Wall-clock send time (unix ms).
    pub ts: i64,
}

impl WakeMessage {
    /// Create a message of the given kind.
    pub fn new(kind: WakeKind) -> Self {
        Self {
            kind,
            id: uuid::Uuid::new_v4().to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback invoked for each received wake message.
///
/// Callbacks should not block for extended periods.
pub type WakeCallback = Arc<dyn Fn(&WakeMessage) + Send + Sync>;

/// Capability for publishing and receiving wake hints.
pub trait WakeChannel: Send + Sync {
    /// Publish a hint to other instances. Best effort; failures are
    /// swallowed by implementations.
    fn publish(&self, message: &WakeMessage);

    /// Subscribe to incoming hints. Returns an id for [`unsubscribe`].
    ///
    /// [`unsubscribe`]: WakeChannel::unsubscribe
    fn subscribe(&self, callback: WakeCallback) -> SubscriptionId;

    /// Remove a subscription. Returns `true` if it existed.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Thread-safe registry of wake subscribers, shared by both channel
/// implementations.
pub(crate) struct SubscriberRegistry {
    callbacks: RwLock<HashMap<SubscriptionId, WakeCallback>>,
    next_id: AtomicU64,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn subscribe(&self, callback: WakeCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks.write().unwrap().insert(id, callback);
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.callbacks.write().unwrap().remove(&id).is_some()
    }

    /// Deliver a message to all subscribers. A panicking callback does not
    /// affect the others.
    pub(crate) fn emit(&self, message: &WakeMessage) {
        let callbacks = self.callbacks.read().unwrap();
        for callback in callbacks.values() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(message);
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_registry_emits_to_all_subscribers() {
        let registry = SubscriberRegistry::new();
        let seen: Arc<Mutex<Vec<WakeKind>>> = Arc::new(Mutex::new(Vec::new()));

        let seen_a = Arc::clone(&seen);
        registry.subscribe(Arc::new(move |msg| {
            seen_a.lock().unwrap().push(msg.kind);
        }));
        let seen_b = Arc::clone(&seen);
        let id_b = registry.subscribe(Arc::new(move |msg| {
            seen_b.lock().unwrap().push(msg.kind);
        }));

        registry.emit(&WakeMessage::new(WakeKind::Outbox));
        assert_eq!(seen.lock().unwrap().len(), 2);

        assert!(registry.unsubscribe(id_b));
        assert!(!registry.unsubscribe(id_b));
        registry.emit(&WakeMessage::new(WakeKind::Leader));
        assert_eq!(seen.lock().unwrap().len(), 3);
    }
}
