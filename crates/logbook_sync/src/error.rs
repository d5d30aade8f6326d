use thiserror::Error;

/// Unified error type for sync operations
#[derive(Debug, Error)]
pub enum SyncError {
    // Storage adapter errors (quota exceeded, backend unavailable, ...)
    #[error("storage error: {0}")]
    Store(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // Transport errors
    #[error("network error: {0}")]
    Network(String),

    #[error("server returned {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or status text
        message: String,
    },

    /// The sync service rejected provisioning outright. Once this is
    /// observed against the default endpoint, the engine stops retrying
    /// for the rest of the session.
    #[error("sync service is unavailable")]
    ServiceUnavailable,

    #[error("no sync credentials are configured")]
    MissingCredentials,

    // Cryptographic errors always fail closed
    #[error("encryption error: {0}")]
    Crypto(String),

    #[error("a passphrase is required to read this space")]
    PassphraseRequired,

    #[error("invalid pairing link: {0}")]
    InvalidLink(String),
}

impl SyncError {
    /// Whether the engine should retry with backoff after this error.
    ///
    /// Cryptographic failures and confirmed unavailability are terminal for
    /// the session; storage, network, and server errors are transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Store(_)
                | SyncError::Serde(_)
                | SyncError::Network(_)
                | SyncError::Http { .. }
        )
    }
}

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
