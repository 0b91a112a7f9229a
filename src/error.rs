use thiserror::Error;

use crate::dnssec::DnsSecError;
use crate::hsm::KeyStoreError;
use crate::zone::ZoneError;

/// Errors surfaced by the tool entry points
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Zone input could not be read or parsed
    #[error("{0}")]
    Parse(ZoneError),

    #[error("HSM connection error: {0}")]
    HsmConnection(String),

    #[error("Key provisioning error: {0}")]
    KeyProvision(String),

    /// Signing an RRset failed; the whole run is abandoned
    #[error("Signing {owner} {rtype} failed: {reason}")]
    Signing {
        owner: String,
        rtype: String,
        reason: String,
    },

    #[error("Denial chain error: {0}")]
    ChainBuild(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<ZoneError> for Error {
    fn from(err: ZoneError) -> Self {
        match err {
            ZoneError::IoError(e) => Error::Io(e),
            other => Error::Parse(other),
        }
    }
}

impl From<KeyStoreError> for Error {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::HsmConnection(e) => Error::HsmConnection(e),
            KeyStoreError::KeyProvision(e) => Error::KeyProvision(e),
            KeyStoreError::Signing(reason) => Error::Signing {
                owner: String::new(),
                rtype: String::new(),
                reason,
            },
        }
    }
}

impl From<DnsSecError> for Error {
    fn from(err: DnsSecError) -> Self {
        match err {
            DnsSecError::InvalidValidity(_)
            | DnsSecError::InvalidNsec3Parameters(_)
            | DnsSecError::UnsupportedAlgorithm(_) => Error::Config(err.to_string()),
            other => Error::ChainBuild(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
