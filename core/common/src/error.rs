//! Common error types for KeepVault.

use thiserror::Error;

/// Top-level error type for KeepVault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Wrong password or tampered vault data.
    ///
    /// Carries no detail on purpose: callers must not be able to tell
    /// the two causes apart.
    #[error("Authentication failed: wrong password or corrupted vault")]
    AuthenticationFailed,

    /// The on-disk envelope is unreadable or uses an unsupported format.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configured storage root is missing or not writable.
    #[error("Storage location unavailable: {0}")]
    LocationUnavailable(String),

    /// Restore requested for a backup that does not exist.
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    /// Cryptographic operation failed for a reason other than authentication.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The operation needs an unlocked session.
    #[error("Vault is locked")]
    Locked,

    /// No storage root has been initialized yet.
    #[error("Storage not initialized")]
    NotInitialized,

    /// Vault service failure (background task, queue shutdown).
    #[error("Vault error: {0}")]
    Vault(String),
}

impl Error {
    /// Whether this error means the password was rejected or the data was altered.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Error::AuthenticationFailed)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
