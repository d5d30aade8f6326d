//! Shared-store polling wake channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::{SubscriberRegistry, SubscriptionId, WakeCallback, WakeChannel, WakeMessage};
use crate::store::{RecordStore, keys};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(750);

/// Fallback wake channel for hosts without a broadcast capability.
///
/// Publishing writes the message to a reserved key in the shared store; a
/// background task polls that key and delivers messages it has not seen
/// before. Delivery is best effort: only the most recent message is held in
/// the mailbox, so rapid publishers can overwrite each other. That is fine -
/// messages are hints to re-check state, not state themselves.
pub struct StorePollingChannel {
    store: Arc<dyn RecordStore>,
    registry: Arc<SubscriberRegistry>,
    interval: Duration,
    last_seen: Arc<Mutex<Option<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StorePollingChannel {
    /// Create a channel over the shared store with the default poll interval.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_interval(store, DEFAULT_POLL_INTERVAL)
    }

    /// Create a channel with a custom poll interval.
    pub fn with_interval(store: Arc<dyn RecordStore>, interval: Duration) -> Self {
        Self {
            store,
            registry: Arc::new(SubscriberRegistry::new()),
            interval,
            last_seen: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Start the background poll loop. Must be called from within a tokio
    /// runtime. Calling `start` twice replaces the previous loop.
    pub fn start(&self) {
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let last_seen = Arc::clone(&self.last_seen);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Some(message) = read_mailbox(store.as_ref()).await {
                    let mut seen = last_seen.lock().unwrap();
                    if seen.as_deref() != Some(message.id.as_str()) {
                        *seen = Some(message.id.clone());
                        drop(seen);
                        registry.emit(&message);
                    }
                }
            }
        });

        if let Some(previous) = self.task.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the poll loop. Subscriptions are kept; `start` resumes delivery.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Poll the mailbox once, delivering an unseen message if present.
    ///
    /// Exposed for hosts that drive polling themselves (and for tests).
    pub async fn poll_once(&self) {
        if let Some(message) = read_mailbox(self.store.as_ref()).await {
            let mut seen = self.last_seen.lock().unwrap();
            if seen.as_deref() != Some(message.id.as_str()) {
                *seen = Some(message.id.clone());
                drop(seen);
                self.registry.emit(&message);
            }
        }
    }
}

async fn read_mailbox(store: &dyn RecordStore) -> Option<WakeMessage> {
    match store.get_record(keys::WAKE).await {
        Ok(Some(value)) => serde_json::from_value(value).ok(),
        Ok(None) => None,
        Err(e) => {
            log::debug!("wake mailbox read failed: {}", e);
            None
        }
    }
}

impl Drop for StorePollingChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WakeChannel for StorePollingChannel {
    fn publish(&self, message: &WakeMessage) {
        // Mark our own message as seen so we do not wake ourselves.
        *self.last_seen.lock().unwrap() = Some(message.id.clone());

        let store = Arc::clone(&self.store);
        let value = match serde_json::to_value(message) {
            Ok(value) => value,
            Err(_) => return,
        };
        // Best effort: fire and forget the mailbox write.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = store.set_record(keys::WAKE, &value).await {
                    log::debug!("wake mailbox write failed: {}", e);
                }
            });
        } else {
            futures_lite::future::block_on(async {
                let _ = store.set_record(keys::WAKE, &value).await;
            });
        }
    }

    fn subscribe(&self, callback: WakeCallback) -> SubscriptionId {
        self.registry.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::WakeKind;
    use crate::store::{InMemoryStore, block_on_test};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_poll_delivers_foreign_messages_once() {
        block_on_test(async {
            let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
            let publisher = StorePollingChannel::new(Arc::clone(&store));
            let receiver = StorePollingChannel::new(Arc::clone(&store));

            let count = Arc::new(AtomicUsize::new(0));
            let count_cb = Arc::clone(&count);
            receiver.subscribe(Arc::new(move |_| {
                count_cb.fetch_add(1, Ordering::SeqCst);
            }));

            publisher.publish(&WakeMessage::new(WakeKind::Outbox));

            receiver.poll_once().await;
            assert_eq!(count.load(Ordering::SeqCst), 1);

            // Same message again: skipped as a duplicate.
            receiver.poll_once().await;
            assert_eq!(count.load(Ordering::SeqCst), 1);

            // The publisher never wakes itself.
            publisher.poll_once().await;
        });
    }
}
