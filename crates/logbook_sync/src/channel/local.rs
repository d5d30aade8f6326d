//! In-process broadcast wake channel.

use super::{SubscriberRegistry, SubscriptionId, WakeCallback, WakeChannel, WakeMessage};

/// Broadcast-capable wake channel for instances sharing a process.
///
/// Messages are delivered synchronously to all subscribers, including ones
/// registered through other clones of the channel. A host with a real
/// cross-process broadcast primitive can wrap it in its own [`WakeChannel`]
/// implementation instead.
#[derive(Default)]
pub struct LocalWakeChannel {
    registry: SubscriberRegistry,
}

impl LocalWakeChannel {
    /// Create a channel with no subscribers.
    pub fn new() -> Self {
        Self {
            registry: SubscriberRegistry::new(),
        }
    }
}

impl WakeChannel for LocalWakeChannel {
    fn publish(&self, message: &WakeMessage) {
        self.registry.emit(message);
    }

    fn subscribe(&self, callback: WakeCallback) -> SubscriptionId {
        self.registry.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }
}
