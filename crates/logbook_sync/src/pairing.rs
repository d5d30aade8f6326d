//! Shareable pairing links for connecting a second device to a space.
//!
//! A pairing link carries everything a new device needs to join an existing
//! space: space id, bearer token, endpoint, and the encryption parameters
//! (never the passphrase). The payload rides in the URI fragment so it
//! cannot end up in server or proxy logs.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::credentials::SyncCredentials;
use crate::envelope::E2eeParams;
use crate::error::{Result, SyncError};

/// Scheme-and-path prefix of a pairing link.
pub const PAIRING_SCHEME: &str = "logbook://pair";

/// The information a pairing link carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingInfo {
    /// Space id.
    pub space_id: String,
    /// Bearer token authenticating the space.
    pub auth_token: String,
    /// Sync service endpoint.
    pub endpoint: String,
    /// Encryption parameters, when the space is end-to-end encrypted. The
    /// joining device still needs the passphrase out of band.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e2ee: Option<E2eeParams>,
}

impl From<&SyncCredentials> for PairingInfo {
    fn from(credentials: &SyncCredentials) -> Self {
        Self {
            space_id: credentials.space_id.clone(),
            auth_token: credentials.auth_token.clone(),
            endpoint: credentials.endpoint.clone(),
            e2ee: credentials.e2ee.clone(),
        }
    }
}

impl PairingInfo {
    /// Turn the link back into credentials for the joining device.
    pub fn into_credentials(self) -> SyncCredentials {
        let mut credentials =
            SyncCredentials::new(self.space_id, self.auth_token, self.endpoint);
        credentials.e2ee = self.e2ee;
        credentials
    }
}

/// Encode a pairing link.
pub fn encode_pairing_link(info: &PairingInfo) -> Result<String> {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(info)?);
    Ok(format!("{}#{}", PAIRING_SCHEME, payload))
}

/// Parse a pairing link produced by [`encode_pairing_link`].
pub fn parse_pairing_link(link: &str) -> Result<PairingInfo> {
    let payload = link
        .strip_prefix(PAIRING_SCHEME)
        .and_then(|rest| rest.strip_prefix('#'))
        .ok_or_else(|| SyncError::InvalidLink("not a pairing link".into()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| SyncError::InvalidLink("payload is not valid base64".into()))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| SyncError::InvalidLink("payload does not decode".into()))
}
