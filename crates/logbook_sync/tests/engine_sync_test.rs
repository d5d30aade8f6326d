//! Integration test: two devices reconciling concurrent edits to one space.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use logbook_sync::Result;
use logbook_sync::channel::{LocalWakeChannel, WakeChannel};
use logbook_sync::clock::now_ms;
use logbook_sync::remote::{BatchItem, IndexEntry, PutResult, RemoteItem, RemoteStore, SpaceIdentity};
use logbook_sync::store::{BoxFuture, InMemoryStore, RecordStore};
use logbook_sync::sync::{RemoteFactory, SyncConfig, SyncEngine};

/// Mock sync service shared by the simulated devices.
struct MockService {
    records: Mutex<HashMap<String, (Value, String)>>,
    etag_counter: AtomicUsize,
}

impl MockService {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            etag_counter: AtomicUsize::new(0),
        })
    }

    fn next_etag(&self) -> String {
        format!("e{}", self.etag_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl RemoteStore for MockService {
    fn get_index(&self) -> BoxFuture<'_, Result<Vec<IndexEntry>>> {
        Box::pin(async move {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .map(|(key, (wire, _))| IndexEntry {
                    key: key.clone(),
                    lt: wire
                        .get("lt")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect())
        })
    }

    fn get_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<RemoteItem>>> {
        Box::pin(async move {
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(key)
                .map(|(wire, etag)| RemoteItem {
                    payload: wire.clone(),
                    etag: Some(etag.clone()),
                }))
        })
    }

    fn put_item<'a>(
        &'a self,
        key: &'a str,
        payload: &'a Value,
        precondition: Option<&'a str>,
        _idempotency_key: &'a str,
    ) -> BoxFuture<'a, Result<PutResult>> {
        Box::pin(async move {
            let mut records = self.records.lock().unwrap();
            if let Some(expected) = precondition {
                let current = records.get(key).map(|(_, etag)| etag.as_str());
                if current != Some(expected) {
                    return Ok(PutResult::Conflict);
                }
            }
            let etag = self.next_etag();
            records.insert(key.to_string(), (payload.clone(), etag.clone()));
            Ok(PutResult::Stored { etag: Some(etag) })
        })
    }

    fn batch<'a>(
        &'a self,
        items: &'a [BatchItem],
        _idempotency_key: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut records = self.records.lock().unwrap();
            for item in items {
                let etag = self.next_etag();
                records.insert(item.key.clone(), (item.payload.clone(), etag));
            }
            Ok(())
        })
    }

    fn create_space(&self) -> BoxFuture<'_, Result<SpaceIdentity>> {
        Box::pin(async move {
            Ok(SpaceIdentity {
                space_id: "space-1".into(),
                auth_token: "token-1".into(),
            })
        })
    }
}

/// A simulated device: its own store, wake channel, and engine.
struct Device {
    engine: SyncEngine,
    store: Arc<dyn RecordStore>,
}

impl Device {
    async fn connect(service: &Arc<MockService>, actor: &str) -> Self {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
        let channel: Arc<dyn WakeChannel> = Arc::new(LocalWakeChannel::new());
        let service: Arc<dyn RemoteStore> = service.clone();
        let factory: RemoteFactory =
            Arc::new(move |_| -> Arc<dyn RemoteStore> { Arc::clone(&service) });
        let engine = SyncEngine::new(
            Arc::clone(&store),
            channel,
            factory,
            SyncConfig::default(),
            actor,
        );

        // Each device is the only instance on its store, so it claims
        // leadership immediately.
        engine.leader().evaluate(now_ms() as i64).await.unwrap();
        assert!(engine.leader().is_leader());
        Device { engine, store }
    }

    async fn log_entry(&self, date: &str, section: &str, entry: &str) {
        let key = format!("day:{}", date);
        let current = self.store.get_record(&key).await.unwrap();
        let mut record = current.unwrap_or_else(|| json!({"date": date, "revision": 0}));

        record["revision"] = json!(record["revision"].as_u64().unwrap_or(0) + 1);
        let sections = record
            .as_object_mut()
            .unwrap()
            .entry("sections")
            .or_insert_with(|| json!({}));
        let slot = sections
            .as_object_mut()
            .unwrap()
            .entry(section)
            .or_insert_with(|| json!({"revision": 0, "entries": [], "tags": []}));
        slot["revision"] = json!(slot["revision"].as_u64().unwrap_or(0) + 1);
        slot["entries"].as_array_mut().unwrap().push(json!(entry));

        self.engine.enqueue_put(&key, record).await.unwrap();
    }

    async fn day_entries(&self, date: &str, section: &str) -> Vec<String> {
        let record = self
            .store
            .get_record(&format!("day:{}", date))
            .await
            .unwrap()
            .expect("day record should exist");
        record["sections"][section]["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }
}

#[test]
fn test_concurrent_additions_converge_to_union() {
    futures_lite::future::block_on(async {
        let service = MockService::new();
        let device_a = Device::connect(&service, "dev-a").await;
        let device_b = Device::connect(&service, "dev-b").await;

        // Both devices are offline and each logs a different entry into the
        // same day's same section.
        device_a.log_entry("2026-08-06", "sleep", "7h restless").await;
        device_b.log_entry("2026-08-06", "sleep", "nap 30min").await;
        assert_eq!(device_a.engine.status().pending, 1);
        assert_eq!(device_b.engine.status().pending, 1);

        // Devices come online one after the other, then settle.
        device_a.engine.sync_now().await.unwrap();
        device_b.engine.sync_now().await.unwrap();
        device_a.engine.sync_now().await.unwrap();

        // Both entries survive on both devices: concurrent additions are
        // never silently dropped.
        for device in [&device_a, &device_b] {
            let entries = device.day_entries("2026-08-06", "sleep").await;
            assert!(entries.contains(&"7h restless".to_string()), "{entries:?}");
            assert!(entries.contains(&"nap 30min".to_string()), "{entries:?}");
        }

        // The merged record's revision exceeds both inputs (each was 1).
        let record = device_a
            .store
            .get_record("day:2026-08-06")
            .await
            .unwrap()
            .unwrap();
        assert!(record["revision"].as_u64().unwrap() > 1);

        // No pending work remains on either side.
        assert_eq!(device_a.engine.status().pending, 0);
        assert_eq!(device_b.engine.status().pending, 0);

        // And no conflict loop: further passes move nothing.
        for device in [&device_a, &device_b] {
            let outcome = device.engine.sync_now().await.unwrap();
            assert_eq!(outcome.pulled, 0);
            assert_eq!(outcome.pushed, 0);
            assert_eq!(outcome.merged, 0);
        }

        // Both devices agree on the record byte for byte.
        let on_a = device_a.store.get_record("day:2026-08-06").await.unwrap();
        let on_b = device_b.store.get_record("day:2026-08-06").await.unwrap();
        assert_eq!(on_a, on_b);
    });
}

#[test]
fn test_second_device_bootstraps_from_remote() {
    futures_lite::future::block_on(async {
        let service = MockService::new();
        let device_a = Device::connect(&service, "dev-a").await;

        device_a.log_entry("2026-08-05", "mood", "good").await;
        device_a.log_entry("2026-08-06", "mood", "tired").await;
        device_a
            .engine
            .enqueue_put("roster", json!({"trackers": [{"id": "1", "label": "Mood"}]}))
            .await
            .unwrap();
        device_a.engine.sync_now().await.unwrap();

        // A fresh device with an empty store pulls the whole space.
        let device_b = Device::connect(&service, "dev-b").await;
        let outcome = device_b.engine.sync_now().await.unwrap();
        assert_eq!(outcome.pulled, 3);

        assert_eq!(device_b.day_entries("2026-08-05", "mood").await, vec!["good"]);
        assert_eq!(device_b.day_entries("2026-08-06", "mood").await, vec!["tired"]);
        let roster = device_b.store.get_record("roster").await.unwrap().unwrap();
        assert_eq!(roster["trackers"][0]["label"], "Mood");
    });
}
