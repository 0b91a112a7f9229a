use std::fmt;
use std::str::FromStr;

use ring::digest;
use ring::signature;

/// DNSSEC algorithm numbers (RFC 4034, 5702, 6605, 8080, 8624) that a zone
/// can be signed or verified with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DnsSecAlgorithm {
    /// RSA/SHA-1 (RFC 3110), verification only
    RsaSha1 = 5,
    /// RSASHA1-NSEC3-SHA1 (RFC 5155), verification only
    RsaSha1Nsec3Sha1 = 7,
    /// RSA/SHA-256 (RFC 5702)
    RsaSha256 = 8,
    /// RSA/SHA-512 (RFC 5702)
    RsaSha512 = 10,
    /// ECDSA Curve P-256 with SHA-256 (RFC 6605)
    EcdsaP256Sha256 = 13,
    /// ECDSA Curve P-384 with SHA-384 (RFC 6605)
    EcdsaP384Sha384 = 14,
    /// Ed25519 (RFC 8080)
    Ed25519 = 15,
}

impl DnsSecAlgorithm {
    /// Create from algorithm number
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            5 => Some(Self::RsaSha1),
            7 => Some(Self::RsaSha1Nsec3Sha1),
            8 => Some(Self::RsaSha256),
            10 => Some(Self::RsaSha512),
            13 => Some(Self::EcdsaP256Sha256),
            14 => Some(Self::EcdsaP384Sha384),
            15 => Some(Self::Ed25519),
            _ => None,
        }
    }

    /// Convert to algorithm number
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether new signatures may be made with this algorithm (RFC 8624
    /// forbids signing with RSA/SHA-1).
    pub fn can_sign(&self) -> bool {
        !matches!(self, Self::RsaSha1 | Self::RsaSha1Nsec3Sha1)
    }

    pub fn is_ecdsa(&self) -> bool {
        matches!(self, Self::EcdsaP256Sha256 | Self::EcdsaP384Sha384)
    }

    pub fn is_rsa(&self) -> bool {
        matches!(
            self,
            Self::RsaSha1 | Self::RsaSha1Nsec3Sha1 | Self::RsaSha256 | Self::RsaSha512
        )
    }

    /// Hash applied to the signed data before an ECDSA or RSA signature,
    /// `None` for Ed25519 which signs the message itself.
    pub fn message_digest(&self) -> Option<&'static digest::Algorithm> {
        match self {
            Self::RsaSha1 | Self::RsaSha1Nsec3Sha1 => Some(&digest::SHA1_FOR_LEGACY_USE_ONLY),
            Self::RsaSha256 | Self::EcdsaP256Sha256 => Some(&digest::SHA256),
            Self::EcdsaP384Sha384 => Some(&digest::SHA384),
            Self::RsaSha512 => Some(&digest::SHA512),
            Self::Ed25519 => None,
        }
    }

    /// Length of the DNSKEY public key field for fixed-size key types
    pub fn public_key_len(&self) -> Option<usize> {
        match self {
            Self::EcdsaP256Sha256 => Some(64),
            Self::EcdsaP384Sha384 => Some(96),
            Self::Ed25519 => Some(32),
            _ => None,
        }
    }

    /// Verification algorithm for ECDSA and Ed25519 keys. RSA keys go through
    /// [`DnsSecAlgorithm::rsa_parameters`] instead.
    pub fn ring_algorithm(&self) -> Option<&'static dyn signature::VerificationAlgorithm> {
        match self {
            // DNSSEC carries ECDSA signatures as fixed-width r || s
            Self::EcdsaP256Sha256 => Some(&signature::ECDSA_P256_SHA256_FIXED),
            Self::EcdsaP384Sha384 => Some(&signature::ECDSA_P384_SHA384_FIXED),
            Self::Ed25519 => Some(&signature::ED25519),
            _ => None,
        }
    }

    pub fn rsa_parameters(&self) -> Option<&'static signature::RsaParameters> {
        match self {
            Self::RsaSha1 | Self::RsaSha1Nsec3Sha1 => {
                Some(&signature::RSA_PKCS1_1024_8192_SHA1_FOR_LEGACY_USE_ONLY)
            }
            Self::RsaSha256 => Some(&signature::RSA_PKCS1_1024_8192_SHA256_FOR_LEGACY_USE_ONLY),
            Self::RsaSha512 => Some(&signature::RSA_PKCS1_1024_8192_SHA512_FOR_LEGACY_USE_ONLY),
            _ => None,
        }
    }
}

impl fmt::Display for DnsSecAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RsaSha1 => write!(f, "RSASHA1"),
            Self::RsaSha1Nsec3Sha1 => write!(f, "RSASHA1-NSEC3-SHA1"),
            Self::RsaSha256 => write!(f, "RSASHA256"),
            Self::RsaSha512 => write!(f, "RSASHA512"),
            Self::EcdsaP256Sha256 => write!(f, "ECDSAP256SHA256"),
            Self::EcdsaP384Sha384 => write!(f, "ECDSAP384SHA384"),
            Self::Ed25519 => write!(f, "ED25519"),
        }
    }
}

impl FromStr for DnsSecAlgorithm {
    type Err = String;

    /// Accepts the mnemonic or the algorithm number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(number) = s.parse::<u8>() {
            return Self::from_u8(number).ok_or_else(|| format!("Unsupported algorithm: {}", s));
        }
        match s.to_ascii_uppercase().replace('_', "-").as_str() {
            "RSASHA1" => Ok(Self::RsaSha1),
            "RSASHA1-NSEC3-SHA1" => Ok(Self::RsaSha1Nsec3Sha1),
            "RSASHA256" => Ok(Self::RsaSha256),
            "RSASHA512" => Ok(Self::RsaSha512),
            "ECDSAP256SHA256" => Ok(Self::EcdsaP256Sha256),
            "ECDSAP384SHA384" => Ok(Self::EcdsaP384Sha384),
            "ED25519" => Ok(Self::Ed25519),
            _ => Err(format!("Unsupported algorithm: {}", s)),
        }
    }
}

impl serde::Serialize for DnsSecAlgorithm {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for DnsSecAlgorithm {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
