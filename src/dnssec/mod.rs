pub mod algorithm;
pub mod canonical;
pub mod context;
pub mod denial;
pub mod digest;
pub mod errors;
pub mod key_tag;
pub mod nsec3;
pub mod signer;
pub mod verifier;
pub mod zonemd;

pub use algorithm::DnsSecAlgorithm;
pub use context::{DenialMode, Nsec3Params, SigningContext};
pub use denial::{DenialChainBuilder, nsec3_chain, nsec_chain};
pub use digest::{DigestType, ZonemdHash};
pub use errors::DnsSecError;
pub use key_tag::calculate_key_tag;
pub use signer::{Signer, SigningKeys};
pub use verifier::{Finding, FindingKind, VerificationReport, Verifier, zone_keys};
pub use zonemd::ZoneDigest;

/// DNSSEC constants
pub mod constants {
    /// Maximum iterations for NSEC3 (RFC 5155)
    pub const MAX_NSEC3_ITERATIONS: u16 = 2500;

    /// NSEC3 hash algorithm number for SHA-1, the only one defined
    pub const NSEC3_HASH_SHA1: u8 = 1;

    /// DNSKEY protocol field, always 3 (RFC 4034 section 2.1.2)
    pub const DNSKEY_PROTOCOL: u8 = 3;

    /// ZONEMD scheme number for SIMPLE (RFC 8976 section 5.2)
    pub const ZONEMD_SCHEME_SIMPLE: u8 = 1;
}
