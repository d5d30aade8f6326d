//! Durable identity and cache for one sync space.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::envelope::E2eeParams;
use crate::error::Result;
use crate::store::{RecordStore, keys};

/// Per-key version knowledge learned from the last successful exchange.
///
/// The `etag` supplies the optimistic-concurrency precondition on push; the
/// `lt` lets the pull pass skip records that have not changed remotely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Version token from the last successful read/write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Logical timestamp of the record as last seen remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<String>,
}

/// Credentials and sync state for the connected space.
///
/// Created once per space (via provisioning or a pairing link) and mutated by
/// the engine after every successful exchange. The encryption passphrase is
/// deliberately absent: it lives only in session memory, and exported backups
/// must never see these secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCredentials {
    /// Space id.
    pub space_id: String,

    /// Bearer token authenticating this space.
    pub auth_token: String,

    /// Sync service endpoint.
    pub endpoint: String,

    /// Encryption parameters, when end-to-end encryption is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e2ee: Option<E2eeParams>,

    /// Per-key version cache.
    #[serde(default)]
    pub record_meta: HashMap<String, RecordMeta>,

    /// Last logical timestamp issued by this device, used to reseed the
    /// clock across restarts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_lt: Option<String>,
}

impl SyncCredentials {
    /// Create credentials for a freshly provisioned space.
    pub fn new(
        space_id: impl Into<String>,
        auth_token: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            space_id: space_id.into(),
            auth_token: auth_token.into(),
            endpoint: endpoint.into(),
            e2ee: None,
            record_meta: HashMap::new(),
            last_lt: None,
        }
    }

    /// Load the persisted credentials, if the device is connected to a space.
    pub async fn load(store: &dyn RecordStore) -> Result<Option<Self>> {
        match store.get_record(keys::CREDENTIALS).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Persist the credentials.
    pub async fn save(&self, store: &dyn RecordStore) -> Result<()> {
        store
            .set_record(keys::CREDENTIALS, &serde_json::to_value(self)?)
            .await?;
        Ok(())
    }

    /// Remove the persisted credentials (the user disconnected sync).
    pub async fn clear(store: &dyn RecordStore) -> Result<()> {
        store.remove_record(keys::CREDENTIALS).await?;
        Ok(())
    }

    /// Version knowledge for a key, if any.
    pub fn meta(&self, key: &str) -> Option<&RecordMeta> {
        self.record_meta.get(key)
    }

    /// Record fresh version knowledge after a successful exchange.
    pub fn update_meta(&mut self, key: &str, etag: Option<String>, lt: Option<String>) {
        self.record_meta
            .insert(key.to_string(), RecordMeta { etag, lt });
    }
}

#[derive(Serialize, Deserialize)]
struct DeviceIdentity {
    actor: String,
}

/// Get or create this device's stable actor id.
///
/// The actor id appears in every logical timestamp the device issues, so it
/// must survive restarts; it is generated once and persisted.
pub async fn ensure_device_id(store: &dyn RecordStore) -> Result<String> {
    if let Some(value) = store.get_record(keys::DEVICE).await? {
        if let Ok(identity) = serde_json::from_value::<DeviceIdentity>(value) {
            return Ok(identity.actor);
        }
    }

    let actor = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let identity = DeviceIdentity {
        actor: actor.clone(),
    };
    store
        .set_record(keys::DEVICE, &serde_json::to_value(identity)?)
        .await?;
    Ok(actor)
}
