//! Durable queue of pending remote writes.
//!
//! Every local mutation that must reach the remote space is recorded as a
//! [`PendingOp`] in the outbox and stays there until a push succeeds (or a
//! conflict is resolved in its place). The queue is coalesced per record key:
//! at any time there is exactly one pending operation per key, holding the
//! latest payload. Operations for distinct keys keep their relative
//! insertion order.
//!
//! The queue is persisted as a single JSON array under a reserved store key,
//! so it survives restarts and is shared between instances on one device.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::store::{RecordStore, keys};

/// The kind of write a pending operation represents.
///
/// The wire protocol has no delete verb; deletions travel as caller-provided
/// tombstone payloads through the same conditional put. The method is kept on
/// the operation so the host application can distinguish intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpMethod {
    /// Create or overwrite a record.
    Put,
    /// Remove a record (pushed as a tombstone payload).
    Delete,
}

/// A single pending remote write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOp {
    /// Unique operation id, also used as the idempotency key on push.
    pub id: String,

    /// Record key this operation targets.
    pub key: String,

    /// Write intent.
    pub method: OpMethod,

    /// Full record payload to push (state-based, not a delta).
    pub payload: Value,

    /// ETag the edit was based on, if one was known at enqueue time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Logical timestamp stamped on the edit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<String>,

    /// Actor that issued the edit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    /// Wall-clock enqueue time (unix ms), informational only.
    pub ts: i64,

    /// Number of failed push attempts so far.
    #[serde(default)]
    pub attempts: u32,

    /// Message from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingOp {
    /// Create a put operation for `key`.
    pub fn put(key: impl Into<String>, payload: Value) -> Self {
        Self::new(key, OpMethod::Put, payload)
    }

    /// Create a delete operation for `key` carrying a tombstone payload.
    pub fn delete(key: impl Into<String>, tombstone: Value) -> Self {
        Self::new(key, OpMethod::Delete, tombstone)
    }

    fn new(key: impl Into<String>, method: OpMethod, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.into(),
            method,
            payload,
            etag: None,
            lt: None,
            actor: None,
            ts: chrono::Utc::now().timestamp_millis(),
            attempts: 0,
            last_error: None,
        }
    }

    /// Attach the logical timestamp and actor stamped on this edit.
    pub fn stamped(mut self, lt: impl Into<String>, actor: impl Into<String>) -> Self {
        self.lt = Some(lt.into());
        self.actor = Some(actor.into());
        self
    }

    /// Attach the ETag this edit was based on.
    pub fn based_on(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }
}

/// Handle over the persisted pending-write queue.
#[derive(Clone)]
pub struct Outbox {
    store: Arc<dyn RecordStore>,
}

impl Outbox {
    /// Create an outbox over the given store.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Load the current queue, oldest first.
    pub async fn list(&self) -> Result<Vec<PendingOp>> {
        match self.store.get_record(keys::OUTBOX).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    /// Number of queued operations (= number of distinct keys pending).
    pub async fn len(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.list().await?.is_empty())
    }

    /// The pending operation for `key`, if any.
    pub async fn get(&self, key: &str) -> Result<Option<PendingOp>> {
        Ok(self.list().await?.into_iter().find(|op| op.key == key))
    }

    /// Add an operation, coalescing with any queued operation for the same
    /// key. The replacement keeps the original slot position, so operations
    /// for other keys are unaffected. Returns the new queue.
    pub async fn enqueue(&self, op: PendingOp) -> Result<Vec<PendingOp>> {
        let mut ops = self.list().await?;
        match ops.iter_mut().find(|existing| existing.key == op.key) {
            Some(slot) => *slot = op,
            None => ops.push(op),
        }
        self.save(&ops).await?;
        Ok(ops)
    }

    /// Remove the operation with the given id (after a successful push).
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut ops = self.list().await?;
        ops.retain(|op| op.id != id);
        self.save(&ops).await
    }

    /// Mutate the operation with the given id in place (attempt/error
    /// bookkeeping). Missing ids are ignored.
    pub async fn update(&self, id: &str, mutate: impl FnOnce(&mut PendingOp)) -> Result<()> {
        let mut ops = self.list().await?;
        if let Some(op) = ops.iter_mut().find(|op| op.id == id) {
            mutate(op);
            self.save(&ops).await?;
        }
        Ok(())
    }

    async fn save(&self, ops: &[PendingOp]) -> Result<()> {
        let value = serde_json::to_value(ops)?;
        self.store.set_record(keys::OUTBOX, &value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, block_on_test};
    use serde_json::json;

    fn outbox() -> Outbox {
        Outbox::new(Arc::new(InMemoryStore::new()))
    }

    #[test]
    fn test_enqueue_coalesces_per_key() {
        block_on_test(async {
            let outbox = outbox();

            outbox
                .enqueue(PendingOp::put("day:2026-08-06", json!({"v": 1})))
                .await
                .unwrap();
            outbox
                .enqueue(PendingOp::put("roster", json!({"trackers": []})))
                .await
                .unwrap();
            let ops = outbox
                .enqueue(PendingOp::put("day:2026-08-06", json!({"v": 2})))
                .await
                .unwrap();

            // One op per key; the coalesced op kept its slot and holds the
            // later payload.
            assert_eq!(ops.len(), 2);
            assert_eq!(ops[0].key, "day:2026-08-06");
            assert_eq!(ops[0].payload, json!({"v": 2}));
            assert_eq!(ops[1].key, "roster");
        });
    }

    #[test]
    fn test_queue_survives_reload() {
        block_on_test(async {
            let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
            let first = Outbox::new(Arc::clone(&store));
            first
                .enqueue(PendingOp::put("settings", json!({"theme": "dark"})))
                .await
                .unwrap();

            // A second handle over the same store sees the queue.
            let second = Outbox::new(store);
            let ops = second.list().await.unwrap();
            assert_eq!(ops.len(), 1);
            assert_eq!(ops[0].key, "settings");
        });
    }

    #[test]
    fn test_remove_and_update() {
        block_on_test(async {
            let outbox = outbox();
            let ops = outbox
                .enqueue(PendingOp::put("day:2026-08-06", json!({})))
                .await
                .unwrap();
            let id = ops[0].id.clone();

            outbox
                .update(&id, |op| {
                    op.attempts += 1;
                    op.last_error = Some("server returned 500".into());
                })
                .await
                .unwrap();
            let op = outbox.get("day:2026-08-06").await.unwrap().unwrap();
            assert_eq!(op.attempts, 1);
            assert!(op.last_error.is_some());

            outbox.remove(&id).await.unwrap();
            assert!(outbox.is_empty().await.unwrap());
        });
    }
}
