use thiserror::Error;

/// Failures reported by a token backend
#[derive(Debug, Clone, Error)]
pub enum TokenError {
    /// The session handle is no longer usable; reopening may help
    #[error("Token session lost: {0}")]
    SessionLost(String),

    #[error("Token not available: {0}")]
    Unavailable(String),

    #[error("Token login failed: {0}")]
    Login(String),

    #[error("Algorithm {0} is not supported by this token")]
    UnsupportedAlgorithm(String),

    #[error("Key not found on token: {0}")]
    KeyNotFound(String),

    #[error("Token operation failed: {0}")]
    Operation(String),

    #[error("Token storage error: {0}")]
    Storage(String),
}

/// Failures surfaced by the key store to its callers
#[derive(Debug, Clone, Error)]
pub enum KeyStoreError {
    /// Opening or keeping a token session failed
    #[error("HSM connection error: {0}")]
    HsmConnection(String),

    /// A key pair could not be found, created or destroyed
    #[error("Key provisioning error: {0}")]
    KeyProvision(String),

    /// The token refused or failed a signature
    #[error("Signing error: {0}")]
    Signing(String),
}

pub type Result<T> = std::result::Result<T, KeyStoreError>;
