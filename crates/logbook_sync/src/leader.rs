//! Cross-instance leader election.
//!
//! Only one instance per device (tab, window, process) may run network sync
//! at a time. Election works over a lock record in the shared store: an
//! instance owns leadership while its last heartbeat is younger than the
//! configured TTL. There is no compare-and-swap - the lock is read then
//! written - so two instances can race a claim; the TTL staleness check keeps
//! the window small and the protocol converges on the next evaluation.
//!
//! Wake-channel messages and store changes are treated purely as hints to
//! re-evaluate, never as authoritative leadership statements.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::channel::{SubscriptionId, WakeChannel, WakeKind, WakeMessage};
use crate::clock::now_ms;
use crate::error::Result;
use crate::store::{RecordStore, keys};

/// The shared lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderLock {
    /// Instance id of the current owner.
    pub id: String,
    /// Owner's last heartbeat (unix ms).
    pub ts: i64,
}

/// Election timing parameters.
#[derive(Debug, Clone)]
pub struct LeaderConfig {
    /// How often the lock is refreshed (leader) or re-contested (follower).
    pub heartbeat: Duration,
    /// Age past which a lock is considered abandoned and may be claimed.
    pub timeout: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(2),
            timeout: Duration::from_secs(6),
        }
    }
}

/// Callback fired when computed leadership actually changes.
///
/// Arguments: whether this instance is now leader, and the current leader's
/// instance id if known.
pub type LeaderCallback = Arc<dyn Fn(bool, Option<String>) + Send + Sync>;

#[derive(Debug, Default)]
struct LeaderState {
    is_leader: bool,
    leader_id: Option<String>,
}

/// One instance's participant handle in the election.
pub struct LeaderElection {
    store: Arc<dyn RecordStore>,
    channel: Arc<dyn WakeChannel>,
    id: String,
    config: LeaderConfig,
    state: Mutex<LeaderState>,
    started: AtomicBool,
    on_change: Mutex<Option<LeaderCallback>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl LeaderElection {
    /// Create a participant with a fresh instance id.
    pub fn new(
        store: Arc<dyn RecordStore>,
        channel: Arc<dyn WakeChannel>,
        config: LeaderConfig,
    ) -> Self {
        Self::with_id(store, channel, config, uuid::Uuid::new_v4().to_string())
    }

    /// Create a participant with an explicit instance id.
    pub fn with_id(
        store: Arc<dyn RecordStore>,
        channel: Arc<dyn WakeChannel>,
        config: LeaderConfig,
        id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            channel,
            id: id.into(),
            config,
            state: Mutex::new(LeaderState::default()),
            started: AtomicBool::new(false),
            on_change: Mutex::new(None),
            heartbeat_task: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    /// This instance's id.
    pub fn instance_id(&self) -> &str {
        &self.id
    }

    /// Whether this instance currently computes itself as leader.
    pub fn is_leader(&self) -> bool {
        self.state.lock().unwrap().is_leader
    }

    /// The instance id of the current leader, if known.
    pub fn leader_id(&self) -> Option<String> {
        self.state.lock().unwrap().leader_id.clone()
    }

    /// Register the leadership-change callback. Replaces any previous one.
    pub fn on_change(&self, callback: LeaderCallback) {
        *self.on_change.lock().unwrap() = Some(callback);
    }

    /// Read the lock and claim or adopt leadership.
    ///
    /// Claims when the lock is absent, stale (older than the timeout), or
    /// already ours; otherwise adopts the lock's owner as leader. Fires the
    /// change callback only on actual transitions. Returns whether this
    /// instance is leader afterwards.
    pub async fn evaluate(&self, now: i64) -> Result<bool> {
        let lock = self.read_lock().await?;

        let claim = match &lock {
            None => true,
            Some(lock) if lock.id == self.id => true,
            Some(lock) => now.saturating_sub(lock.ts) >= self.config.timeout.as_millis() as i64,
        };

        let (is_leader, leader_id) = if claim {
            self.write_lock(now).await?;
            (true, Some(self.id.clone()))
        } else {
            (false, lock.map(|l| l.id))
        };

        self.apply(is_leader, leader_id);
        Ok(is_leader)
    }

    /// Start the heartbeat loop and subscribe to wake hints.
    ///
    /// Must be called from within a tokio runtime. The heartbeat refreshes
    /// the lock while leader and re-contests it while follower.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = Arc::clone(self);
        let heartbeat = self.config.heartbeat;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            loop {
                ticker.tick().await;
                if let Err(e) = this.evaluate(now_ms() as i64).await {
                    log::warn!("leader heartbeat failed: {}", e);
                }
            }
        });
        *self.heartbeat_task.lock().unwrap() = Some(handle);

        // Hints accelerate convergence between heartbeats but only ever
        // trigger a re-check.
        let weak: Weak<LeaderElection> = Arc::downgrade(self);
        let id = self.channel.subscribe(Arc::new(move |message: &WakeMessage| {
            if message.kind != WakeKind::Leader {
                return;
            }
            if let Some(this) = weak.upgrade() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        let _ = this.evaluate(now_ms() as i64).await;
                    });
                }
            }
        }));
        *self.subscription.lock().unwrap() = Some(id);
    }

    /// Halt the heartbeat and unsubscribe from hints.
    ///
    /// The lock is deliberately not released: it expires on its own, which
    /// keeps shutdown free of shared-store writes.
    pub fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        if let Some(handle) = self.heartbeat_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(id) = self.subscription.lock().unwrap().take() {
            self.channel.unsubscribe(id);
        }
    }

    async fn read_lock(&self) -> Result<Option<LeaderLock>> {
        match self.store.get_record(keys::LEADER_LOCK).await? {
            // A corrupt lock record is treated as absent and overwritten.
            Some(value) => Ok(serde_json::from_value(value).ok()),
            None => Ok(None),
        }
    }

    async fn write_lock(&self, now: i64) -> Result<()> {
        let lock = LeaderLock {
            id: self.id.clone(),
            ts: now,
        };
        self.store
            .set_record(keys::LEADER_LOCK, &serde_json::to_value(&lock)?)
            .await?;
        Ok(())
    }

    fn apply(&self, is_leader: bool, leader_id: Option<String>) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            let changed = state.is_leader != is_leader || state.leader_id != leader_id;
            state.is_leader = is_leader;
            state.leader_id = leader_id.clone();
            changed
        };

        if changed {
            log::debug!(
                "leadership changed: leader={} id={:?}",
                is_leader,
                leader_id
            );
            if is_leader {
                self.channel.publish(&WakeMessage::new(WakeKind::Leader));
            }
            let callback = self.on_change.lock().unwrap().clone();
            if let Some(callback) = callback {
                callback(is_leader, leader_id);
            }
        }
    }
}

impl Drop for LeaderElection {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LocalWakeChannel;
    use crate::store::{InMemoryStore, block_on_test};
    use std::sync::atomic::AtomicUsize;

    fn participants(n: usize) -> (Arc<dyn RecordStore>, Vec<LeaderElection>) {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        let channel: Arc<dyn WakeChannel> = Arc::new(LocalWakeChannel::new());
        let elections = (0..n)
            .map(|i| {
                LeaderElection::with_id(
                    Arc::clone(&store),
                    Arc::clone(&channel),
                    LeaderConfig::default(),
                    format!("instance-{}", i),
                )
            })
            .collect();
        (store, elections)
    }

    #[test]
    fn test_exactly_one_leader() {
        block_on_test(async {
            let (_store, elections) = participants(3);
            let now = 1_000_000;

            for e in &elections {
                e.evaluate(now).await.unwrap();
            }

            let leaders: Vec<_> = elections.iter().filter(|e| e.is_leader()).collect();
            assert_eq!(leaders.len(), 1);
            assert_eq!(leaders[0].instance_id(), "instance-0");

            // Followers agree on who leads.
            for e in &elections {
                assert_eq!(e.leader_id().as_deref(), Some("instance-0"));
            }
        });
    }

    #[test]
    fn test_stale_lock_is_claimed() {
        block_on_test(async {
            let (_store, elections) = participants(2);
            let timeout_ms = LeaderConfig::default().timeout.as_millis() as i64;
            let now = 1_000_000;

            elections[0].evaluate(now).await.unwrap();
            elections[1].evaluate(now).await.unwrap();
            assert!(!elections[1].is_leader());

            // Leader goes silent; once the TTL elapses the follower takes
            // over on its next heartbeat.
            let later = now + timeout_ms + 1;
            assert!(elections[1].evaluate(later).await.unwrap());
            assert!(elections[1].is_leader());

            // The old leader re-checks and adopts the new owner.
            elections[0].evaluate(later + 10).await.unwrap();
            assert!(!elections[0].is_leader());
            assert_eq!(elections[0].leader_id().as_deref(), Some("instance-1"));
        });
    }

    #[test]
    fn test_on_change_fires_only_on_transitions() {
        block_on_test(async {
            let (_store, elections) = participants(1);
            let changes = Arc::new(AtomicUsize::new(0));
            let changes_cb = Arc::clone(&changes);
            elections[0].on_change(Arc::new(move |_, _| {
                changes_cb.fetch_add(1, Ordering::SeqCst);
            }));

            elections[0].evaluate(1_000).await.unwrap();
            elections[0].evaluate(2_000).await.unwrap();
            elections[0].evaluate(3_000).await.unwrap();

            // Became leader once; refreshes are not transitions.
            assert_eq!(changes.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn test_corrupt_lock_treated_as_absent() {
        block_on_test(async {
            let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
            store
                .set_record(keys::LEADER_LOCK, &serde_json::json!("not a lock"))
                .await
                .unwrap();

            let channel: Arc<dyn WakeChannel> = Arc::new(LocalWakeChannel::new());
            let election = LeaderElection::with_id(
                Arc::clone(&store),
                channel,
                LeaderConfig::default(),
                "instance-0",
            );
            assert!(election.evaluate(1_000).await.unwrap());
        });
    }
}
