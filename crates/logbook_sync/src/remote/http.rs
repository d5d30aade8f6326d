//! HTTP binding of the sync wire protocol.

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, ETAG, IF_MATCH};
use serde::Deserialize;
use serde_json::Value;

use super::{BatchItem, IndexEntry, PutResult, RemoteItem, SpaceIdentity};
use super::{PROTOCOL_PREFIX, RemoteStore};
use crate::error::{Result, SyncError};
use crate::store::BoxFuture;

const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

/// reqwest-backed [`RemoteStore`].
pub struct HttpRemoteStore {
    http: reqwest::Client,
    endpoint: String,
    space_id: String,
    auth_token: String,
}

impl HttpRemoteStore {
    /// Create a client for one space.
    pub fn new(
        endpoint: impl Into<String>,
        space_id: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            space_id: space_id.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Create a client bound to persisted credentials.
    pub fn from_credentials(credentials: &crate::credentials::SyncCredentials) -> Self {
        Self::new(
            &credentials.endpoint,
            &credentials.space_id,
            &credentials.auth_token,
        )
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}{}{}",
            self.endpoint.trim_end_matches('/'),
            PROTOCOL_PREFIX,
            path
        )
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.auth_token)
    }
}

fn transport_err(e: reqwest::Error) -> SyncError {
    SyncError::Network(e.to_string())
}

async fn status_err(response: reqwest::Response) -> SyncError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    SyncError::Http { status, message }
}

#[derive(Deserialize)]
struct IndexResponse {
    items: Vec<IndexEntry>,
}

impl RemoteStore for HttpRemoteStore {
    fn get_index(&self) -> BoxFuture<'_, Result<Vec<IndexEntry>>> {
        Box::pin(async move {
            let response = self
                .http
                .get(self.url("/index"))
                .query(&[("spaceId", self.space_id.as_str())])
                .header(AUTHORIZATION, self.bearer())
                .send()
                .await
                .map_err(transport_err)?;

            if !response.status().is_success() {
                return Err(status_err(response).await);
            }
            let body: IndexResponse = response.json().await.map_err(transport_err)?;
            Ok(body.items)
        })
    }

    fn get_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<RemoteItem>>> {
        Box::pin(async move {
            let response = self
                .http
                .get(self.url(&format!("/item/{}", urlencoding::encode(key))))
                .query(&[("spaceId", self.space_id.as_str())])
                .header(AUTHORIZATION, self.bearer())
                .send()
                .await
                .map_err(transport_err)?;

            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(status_err(response).await);
            }

            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim_matches('"').to_string());
            let payload: Value = response.json().await.map_err(transport_err)?;
            Ok(Some(RemoteItem { payload, etag }))
        })
    }

    fn put_item<'a>(
        &'a self,
        key: &'a str,
        payload: &'a Value,
        precondition: Option<&'a str>,
        idempotency_key: &'a str,
    ) -> BoxFuture<'a, Result<PutResult>> {
        Box::pin(async move {
            let if_match = match precondition {
                Some(etag) => format!("\"{}\"", etag.trim_matches('"')),
                None => "*".to_string(),
            };

            let response = self
                .http
                .put(self.url(&format!("/item/{}", urlencoding::encode(key))))
                .query(&[("spaceId", self.space_id.as_str())])
                .header(AUTHORIZATION, self.bearer())
                .header(IF_MATCH, if_match)
                .header(IDEMPOTENCY_KEY, idempotency_key)
                .json(payload)
                .send()
                .await
                .map_err(transport_err)?;

            if response.status() == StatusCode::PRECONDITION_FAILED {
                return Ok(PutResult::Conflict);
            }
            if !response.status().is_success() {
                return Err(status_err(response).await);
            }

            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim_matches('"').to_string());
            Ok(PutResult::Stored { etag })
        })
    }

    fn batch<'a>(
        &'a self,
        items: &'a [BatchItem],
        idempotency_key: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let response = self
                .http
                .post(self.url("/batch"))
                .query(&[("spaceId", self.space_id.as_str())])
                .header(AUTHORIZATION, self.bearer())
                .header(IDEMPOTENCY_KEY, idempotency_key)
                .json(&serde_json::json!({ "items": items }))
                .send()
                .await
                .map_err(transport_err)?;

            if !response.status().is_success() {
                return Err(status_err(response).await);
            }
            Ok(())
        })
    }

    fn create_space(&self) -> BoxFuture<'_, Result<SpaceIdentity>> {
        Box::pin(async move {
            let response = self
                .http
                .post(self.url("/create"))
                .send()
                .await
                .map_err(transport_err)?;

            if !response.status().is_success() {
                return Err(status_err(response).await);
            }
            response.json().await.map_err(transport_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_endpoint_and_prefix() {
        let client = HttpRemoteStore::new("https://sync.example.com/", "s1", "t1");
        assert_eq!(
            client.url("/item/day:2026-08-06"),
            "https://sync.example.com/sync/v1/item/day:2026-08-06"
        );
    }
}
