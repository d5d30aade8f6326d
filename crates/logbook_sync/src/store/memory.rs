//! In-memory record store.

use std::collections::BTreeMap;
use std::io::Result;
use std::sync::Mutex;

use serde_json::Value;

use super::{BoxFuture, RecordStore};

/// In-memory implementation of [`RecordStore`].
///
/// Used by tests and as a scratch store where persistence is not needed.
/// Nothing survives the process; every instance is its own isolated "device"
/// unless explicitly shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<BTreeMap<String, Value>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }
}

impl RecordStore for InMemoryStore {
    fn get_record<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move { Ok(self.records.lock().unwrap().get(key).cloned()) })
    }

    fn set_record<'a>(&'a self, key: &'a str, value: &'a Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.records
                .lock()
                .unwrap()
                .insert(key.to_string(), value.clone());
            Ok(())
        })
    }

    fn remove_record<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.records.lock().unwrap().remove(key);
            Ok(())
        })
    }

    fn list_keys<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            Ok(self
                .records
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        })
    }
}
