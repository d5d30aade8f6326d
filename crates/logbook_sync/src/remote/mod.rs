//! Remote sync protocol client.
//!
//! [`RemoteStore`] is a pure protocol binding: index, fetch, conditional
//! put, bulk put, and space provisioning. It performs no caching and no
//! retries of its own - that policy belongs to the sync engine. Per-request
//! timeouts are the transport's concern.
//!
//! An HTTP implementation over the wire contract is available behind the
//! `http-client` feature; hosts on other transports inject their own
//! implementation.

#[cfg(all(feature = "http-client", not(target_arch = "wasm32")))]
mod http;

#[cfg(all(feature = "http-client", not(target_arch = "wasm32")))]
pub use http::HttpRemoteStore;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::store::BoxFuture;

/// Default sync service endpoint.
///
/// Provisioning failures against this endpoint (as opposed to a
/// user-configured one) flip the engine's confirmed-unavailable state.
pub const DEFAULT_ENDPOINT: &str = "https://sync.logbook.app";

/// Versioned path prefix of the wire protocol.
pub const PROTOCOL_PREFIX: &str = "/sync/v1";

/// One entry of the remote index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Record key.
    pub key: String,
    /// Logical timestamp of the remote record.
    pub lt: String,
}

/// A fetched remote record.
#[derive(Debug, Clone)]
pub struct RemoteItem {
    /// Wire payload (the `{lt, data}` wrapper).
    pub payload: Value,
    /// Version token for optimistic concurrency on the next write.
    pub etag: Option<String>,
}

/// Outcome of a conditional put.
#[derive(Debug, Clone)]
pub enum PutResult {
    /// The write was accepted.
    Stored {
        /// The record's new version token.
        etag: Option<String>,
    },
    /// The precondition did not match the record's current version.
    Conflict,
}

/// One item of a bulk upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    /// Record key.
    pub key: String,
    /// Wire payload.
    pub payload: Value,
}

/// Identity of a freshly provisioned space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceIdentity {
    /// Space id.
    #[serde(rename = "spaceId")]
    pub space_id: String,
    /// Bearer token authenticating this space.
    #[serde(rename = "authToken")]
    pub auth_token: String,
}

/// Protocol binding to one remote space.
///
/// Every authenticated call carries the space's bearer token and space
/// scope; both are fixed at construction.
pub trait RemoteStore: Send + Sync {
    /// List all records in the space with their logical timestamps.
    fn get_index(&self) -> BoxFuture<'_, Result<Vec<IndexEntry>>>;

    /// Fetch a record, returning `None` if it does not exist.
    fn get_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<RemoteItem>>>;

    /// Conditionally write a record.
    ///
    /// `precondition` is the expected current etag; `None` means the
    /// wildcard precondition (write regardless of current version).
    /// `idempotency_key` lets the server deduplicate retried writes.
    fn put_item<'a>(
        &'a self,
        key: &'a str,
        payload: &'a Value,
        precondition: Option<&'a str>,
        idempotency_key: &'a str,
    ) -> BoxFuture<'a, Result<PutResult>>;

    /// Upload several records unconditionally in one call.
    fn batch<'a>(
        &'a self,
        items: &'a [BatchItem],
        idempotency_key: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Provision a new space on this endpoint.
    fn create_space(&self) -> BoxFuture<'_, Result<SpaceIdentity>>;
}
