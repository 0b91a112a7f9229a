use thiserror::Error;

/// Cryptographic and chain-construction errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DnsSecError {
    /// Algorithm not supported
    #[error("Unsupported DNSSEC algorithm: {0}")]
    UnsupportedAlgorithm(u8),

    /// Invalid public key format
    #[error("Invalid DNSKEY public key format")]
    InvalidPublicKey,

    /// Invalid signature format
    #[error("Invalid RRSIG signature format")]
    InvalidSignature,

    /// Signature verification failed
    #[error("DNSSEC signature verification failed")]
    SignatureVerificationFailed,

    /// Invalid NSEC3 parameters
    #[error("Invalid NSEC3 parameters: {0}")]
    InvalidNsec3Parameters(String),

    /// Two distinct names share an NSEC3 hash
    #[error("NSEC3 hash collision between {0} and {1}")]
    Nsec3HashCollision(String, String),

    /// Denial chain cannot be built from this zone
    #[error("Cannot build denial chain: {0}")]
    ChainBuild(String),

    /// RDATA longer than the 16-bit RDLENGTH field allows
    #[error("RDATA of {0} is {1} bytes, over the 65535 byte limit")]
    RdataTooLong(String, usize),

    #[error("Zone has no SOA record")]
    MissingSoa,

    /// Inception not before expiration
    #[error("Invalid signature validity period: {0}")]
    InvalidValidity(String),
}

pub type Result<T> = std::result::Result<T, DnsSecError>;
