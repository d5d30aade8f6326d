//! End-to-end encryption envelope for synced payloads.
//!
//! Encryption is optional and enabled per space. The passphrase is held only
//! in memory for the session - it is never persisted and never leaves the
//! device. Keys are derived with PBKDF2 over a per-space random salt, and
//! records are sealed with AES-256-GCM. The additional authenticated data
//! binds each ciphertext to its space id and record key, so an envelope
//! cannot be replayed under a different key or space.
//!
//! Every envelope is self-describing (algorithm, KDF, hash, iteration count,
//! salt, nonce, version): a record sealed under old parameters stays
//! decryptable after the defaults change.
//!
//! Decryption fails closed. A wrong passphrase, a tampered ciphertext, or a
//! mismatched binding yields an error, never partial plaintext.

use std::collections::HashMap;
use std::sync::Mutex;

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Result, SyncError};

/// Default PBKDF2 iteration count for newly enabled spaces.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Default KDF hash for newly enabled spaces.
pub const DEFAULT_HASH: &str = "SHA-256";

const ENVELOPE_VERSION: u32 = 1;
const ALG_A256GCM: &str = "A256GCM";
const KDF_PBKDF2: &str = "PBKDF2";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Per-space encryption parameters, stored in the sync credentials and
/// shared through pairing links. Holds no secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct E2eeParams {
    /// Whether payloads for this space are encrypted.
    pub enabled: bool,
    /// PBKDF2 iteration count.
    pub iterations: u32,
    /// KDF hash name (`SHA-256` or `SHA-512`).
    pub hash: String,
    /// Per-space random salt, base64.
    pub salt: String,
}

impl E2eeParams {
    /// Generate parameters for a space being encrypted for the first time.
    pub fn generate(iterations: u32) -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        Self {
            enabled: true,
            iterations,
            hash: DEFAULT_HASH.to_string(),
            salt: B64.encode(salt),
        }
    }
}

/// A derived symmetric key. Zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SpaceKey([u8; 32]);

/// Session-only key material: the passphrase plus a cache of keys derived
/// from it, one per distinct `(hash, iterations, salt)` combination seen in
/// envelopes. Nothing here is ever persisted.
pub struct Keyring {
    passphrase: Zeroizing<String>,
    cache: Mutex<HashMap<String, SpaceKey>>,
}

impl Keyring {
    /// Hold a passphrase for the session.
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase.into()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Derive (or fetch from cache) the key for the given KDF parameters.
    pub fn key_for(&self, hash: &str, iterations: u32, salt_b64: &str) -> Result<SpaceKey> {
        let cache_key = format!("{}:{}:{}", hash, iterations, salt_b64);
        if let Some(key) = self.cache.lock().unwrap().get(&cache_key) {
            return Ok(key.clone());
        }

        let salt = B64
            .decode(salt_b64)
            .map_err(|_| SyncError::Crypto("invalid salt encoding".into()))?;

        let mut out = [0u8; 32];
        match hash {
            "SHA-256" => {
                pbkdf2::pbkdf2_hmac::<Sha256>(self.passphrase.as_bytes(), &salt, iterations, &mut out)
            }
            "SHA-512" => {
                pbkdf2::pbkdf2_hmac::<Sha512>(self.passphrase.as_bytes(), &salt, iterations, &mut out)
            }
            other => {
                return Err(SyncError::Crypto(format!("unsupported KDF hash: {}", other)));
            }
        }

        let key = SpaceKey(out);
        self.cache
            .lock()
            .unwrap()
            .insert(cache_key, key.clone());
        Ok(key)
    }
}

/// The self-describing encrypted wrapper around a record's plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeBody {
    /// Envelope format version.
    pub v: u32,
    /// Cipher identifier.
    pub alg: String,
    /// KDF identifier.
    pub kdf: String,
    /// KDF hash name.
    pub hash: String,
    /// KDF iteration count.
    pub iter: u32,
    /// KDF salt, base64.
    pub salt: String,
    /// Cipher nonce, base64.
    pub nonce: String,
    /// Ciphertext, base64.
    pub ct: String,
}

/// Whether a JSON value looks like an encryption envelope.
pub fn is_envelope(value: &Value) -> bool {
    value.get("ct").is_some() && value.get("nonce").is_some() && value.get("alg").is_some()
}

fn binding(space_id: &str, record_key: &str) -> String {
    format!("{}/{}", space_id, record_key)
}

/// Seal a record's plaintext into an envelope.
pub fn encrypt_record(
    keyring: &Keyring,
    params: &E2eeParams,
    space_id: &str,
    record_key: &str,
    plaintext: &Value,
) -> Result<Value> {
    let key = keyring.key_for(&params.hash, params.iterations, &params.salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|_| SyncError::Crypto("invalid key length".into()))?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let aad = binding(space_id, record_key);
    let msg = serde_json::to_vec(plaintext)?;
    let ct = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &msg,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| SyncError::Crypto("encryption failed".into()))?;

    let envelope = EnvelopeBody {
        v: ENVELOPE_VERSION,
        alg: ALG_A256GCM.to_string(),
        kdf: KDF_PBKDF2.to_string(),
        hash: params.hash.clone(),
        iter: params.iterations,
        salt: params.salt.clone(),
        nonce: B64.encode(nonce),
        ct: B64.encode(ct),
    };
    Ok(serde_json::to_value(envelope)?)
}

/// Open an envelope back into the record's plaintext.
///
/// The KDF parameters come from the envelope itself, not from the space's
/// current defaults, so old records stay readable.
pub fn decrypt_record(
    keyring: &Keyring,
    space_id: &str,
    record_key: &str,
    envelope: &Value,
) -> Result<Value> {
    let body: EnvelopeBody = serde_json::from_value(envelope.clone())
        .map_err(|_| SyncError::Crypto("malformed envelope".into()))?;

    if body.alg != ALG_A256GCM || body.kdf != KDF_PBKDF2 {
        return Err(SyncError::Crypto(format!(
            "unsupported envelope: alg={} kdf={}",
            body.alg, body.kdf
        )));
    }

    let key = keyring.key_for(&body.hash, body.iter, &body.salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|_| SyncError::Crypto("invalid key length".into()))?;

    let nonce = B64
        .decode(&body.nonce)
        .map_err(|_| SyncError::Crypto("invalid nonce encoding".into()))?;
    if nonce.len() != NONCE_LEN {
        return Err(SyncError::Crypto("invalid nonce length".into()));
    }
    let ct = B64
        .decode(&body.ct)
        .map_err(|_| SyncError::Crypto("invalid ciphertext encoding".into()))?;

    let aad = binding(space_id, record_key);
    let msg = cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &ct,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| {
            SyncError::Crypto("decryption failed: wrong passphrase or tampered data".into())
        })?;

    Ok(serde_json::from_slice(&msg)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Low iteration count keeps the tests fast; real spaces use the default.
    fn params() -> E2eeParams {
        E2eeParams::generate(1_000)
    }

    #[test]
    fn test_round_trip() {
        let params = params();
        let keyring = Keyring::new("correct horse battery staple");
        let plain = json!({"date": "2026-08-06", "sections": {"sleep": {"entries": ["7h"]}}});

        let sealed =
            encrypt_record(&keyring, &params, "space-1", "day:2026-08-06", &plain).unwrap();
        assert!(is_envelope(&sealed));
        assert!(sealed.to_string().find("sleep").is_none());

        let opened = decrypt_record(&keyring, "space-1", "day:2026-08-06", &sealed).unwrap();
        assert_eq!(opened, plain);
    }

    #[test]
    fn test_wrong_passphrase_fails_closed() {
        let params = params();
        let keyring = Keyring::new("right");
        let sealed =
            encrypt_record(&keyring, &params, "space-1", "roster", &json!({"trackers": []}))
                .unwrap();

        let wrong = Keyring::new("wrong");
        let err = decrypt_record(&wrong, "space-1", "roster", &sealed).unwrap_err();
        assert!(matches!(err, SyncError::Crypto(_)));
    }

    #[test]
    fn test_binding_mismatch_fails_closed() {
        let params = params();
        let keyring = Keyring::new("pass");
        let sealed =
            encrypt_record(&keyring, &params, "space-1", "settings", &json!({"theme": "dark"}))
                .unwrap();

        // Same key material, different record key or space: replay rejected.
        assert!(decrypt_record(&keyring, "space-1", "roster", &sealed).is_err());
        assert!(decrypt_record(&keyring, "space-2", "settings", &sealed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let params = params();
        let keyring = Keyring::new("pass");
        let mut sealed =
            encrypt_record(&keyring, &params, "space-1", "settings", &json!({"a": 1})).unwrap();

        let ct = sealed["ct"].as_str().unwrap().to_string();
        let mut bytes = B64.decode(&ct).unwrap();
        bytes[0] ^= 0x01;
        sealed["ct"] = Value::String(B64.encode(bytes));

        assert!(decrypt_record(&keyring, "space-1", "settings", &sealed).is_err());
    }

    #[test]
    fn test_envelope_is_self_describing() {
        // Sealed under non-default parameters; decryption reads them from
        // the envelope rather than the space's current settings.
        let old_params = E2eeParams {
            enabled: true,
            iterations: 500,
            hash: "SHA-512".to_string(),
            salt: B64.encode([7u8; SALT_LEN]),
        };
        let keyring = Keyring::new("pass");
        let sealed =
            encrypt_record(&keyring, &old_params, "space-1", "settings", &json!({"a": 1}))
                .unwrap();

        let opened = decrypt_record(&keyring, "space-1", "settings", &sealed).unwrap();
        assert_eq!(opened, json!({"a": 1}));
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let params = params();
        let keyring = Keyring::new("pass");
        let mut sealed =
            encrypt_record(&keyring, &params, "space-1", "settings", &json!({"a": 1})).unwrap();
        sealed["alg"] = Value::String("ROT13".into());

        let err = decrypt_record(&keyring, "space-1", "settings", &sealed).unwrap_err();
        assert!(matches!(err, SyncError::Crypto(_)));
    }
}
