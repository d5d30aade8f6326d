//! Record store adapter.
//!
//! The sync subsystem never depends on a concrete storage technology. All
//! reads and writes go through the object-safe [`RecordStore`] trait, which a
//! host application implements over whatever backend it uses for local
//! records. [`InMemoryStore`] is provided for tests and non-persistent use.
//!
//! ## Object safety
//!
//! `RecordStore` is designed to be object-safe so it can be shared as
//! `Arc<dyn RecordStore>` between the engine, the outbox, and leader
//! election. To enable this, all methods return boxed futures.

mod memory;

pub use memory::InMemoryStore;

use std::future::Future;
use std::io::Result;
use std::pin::Pin;

use serde_json::Value;

#[cfg(test)]
pub(crate) fn block_on_test<F: Future>(f: F) -> F::Output {
    futures_lite::future::block_on(f)
}

/// A boxed future for object-safe async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Reserved store keys used by the sync subsystem.
///
/// Host applications must treat these keys as opaque; they share the record
/// namespace so that a single adapter implementation covers everything.
pub mod keys {
    /// The pending-write queue, stored as one JSON array.
    pub const OUTBOX: &str = "sync/outbox";
    /// Durable credentials and record-meta cache for the connected space.
    pub const CREDENTIALS: &str = "sync/credentials";
    /// Leader lock record (`{id, ts}`).
    pub const LEADER_LOCK: &str = "sync/leader";
    /// Per-device identity record.
    pub const DEVICE: &str = "sync/device";
    /// Shared-store mailbox for the polling wake channel.
    pub const WAKE: &str = "sync/wake";
    /// Prefix under which labeled snapshots are written.
    pub const SNAPSHOT_PREFIX: &str = "snapshot/";
}

/// Async abstraction over the local record store.
///
/// Records are JSON values addressed by string keys. Singleton records
/// (settings, roster, dismissal state) use fixed keys; keyed records (daily
/// logs) use a prefix scheme such as `day:<date>`.
///
/// Implementations must propagate backend failures (quota exceeded, backend
/// unavailable) as errors; the sync subsystem does not implement a secondary
/// storage fallback.
pub trait RecordStore: Send + Sync {
    /// Read a record, returning `None` if it does not exist.
    fn get_record<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>>;

    /// Write (create or overwrite) a record.
    fn set_record<'a>(&'a self, key: &'a str, value: &'a Value) -> BoxFuture<'a, Result<()>>;

    /// Delete a record. Deleting a missing record is not an error.
    fn remove_record<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;

    /// List all keys starting with `prefix`, in unspecified order.
    fn list_keys<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Remove every record whose key starts with `prefix`.
    ///
    /// Used to clear derived read-optimization indexes.
    fn clear_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for key in self.list_keys(prefix).await? {
                self.remove_record(&key).await?;
            }
            Ok(())
        })
    }
}

/// Persist a labeled snapshot of a record's previous value.
///
/// Snapshots are written under [`keys::SNAPSHOT_PREFIX`] as
/// `snapshot/<label>/<key>` with the capture time embedded, so the most
/// recent snapshot per label and key is always recoverable.
pub async fn save_snapshot(
    store: &dyn RecordStore,
    label: &str,
    key: &str,
    value: &Value,
) -> Result<()> {
    let snapshot_key = format!("{}{}/{}", keys::SNAPSHOT_PREFIX, label, key);
    let body = serde_json::json!({
        "captured_at": chrono::Utc::now().to_rfc3339(),
        "key": key,
        "value": value,
    });
    store.set_record(&snapshot_key, &body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_snapshot_is_recoverable() {
        block_on_test(async {
            let store = InMemoryStore::new();
            let value = json!({"date": "2026-08-06", "revision": 2});

            save_snapshot(&store, "conflict", "day:2026-08-06", &value)
                .await
                .unwrap();

            let stored = store
                .get_record("snapshot/conflict/day:2026-08-06")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored["value"], value);
            assert_eq!(stored["key"], "day:2026-08-06");
            assert!(stored["captured_at"].is_string());
        });
    }
}
