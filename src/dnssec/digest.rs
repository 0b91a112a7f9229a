use std::fmt;
use std::str::FromStr;

use ring::digest;

use crate::dns::{Dnskey, Ds, Name};

/// DS digest type algorithms (RFC 4034, 4509, 6605)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DigestType {
    /// SHA-1 (RFC 3658)
    Sha1 = 1,
    /// SHA-256 (RFC 4509)
    Sha256 = 2,
    /// SHA-384 (RFC 6605)
    Sha384 = 4,
}

impl DigestType {
    /// Create from digest type number
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Sha1),
            2 => Some(Self::Sha256),
            4 => Some(Self::Sha384),
            _ => None,
        }
    }

    /// Convert to digest type number
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    fn ring_algorithm(&self) -> &'static digest::Algorithm {
        match self {
            Self::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => &digest::SHA256,
            Self::Sha384 => &digest::SHA384,
        }
    }

    /// Calculate digest of data using this algorithm
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        digest::digest(self.ring_algorithm(), data).as_ref().to_vec()
    }

    /// DS record for `key` owned by `owner` (RFC 4034 section 5.1.4)
    pub fn ds_for(&self, owner: &Name, key: &Dnskey) -> Ds {
        let mut data = owner.to_canonical_wire();
        data.extend_from_slice(&key.flags.to_be_bytes());
        data.push(key.protocol);
        data.push(key.algorithm);
        data.extend_from_slice(&key.public_key);

        Ds {
            key_tag: key.key_tag(),
            algorithm: key.algorithm,
            digest_type: self.to_u8(),
            digest: self.digest(&data),
        }
    }
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => write!(f, "SHA1"),
            Self::Sha256 => write!(f, "SHA256"),
            Self::Sha384 => write!(f, "SHA384"),
        }
    }
}

/// ZONEMD hash algorithms (RFC 8976 section 5.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ZonemdHash {
    #[default]
    Sha384 = 1,
    Sha512 = 2,
}

impl ZonemdHash {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Sha384),
            2 => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn ring_algorithm(&self) -> &'static digest::Algorithm {
        match self {
            Self::Sha384 => &digest::SHA384,
            Self::Sha512 => &digest::SHA512,
        }
    }

    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

impl fmt::Display for ZonemdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha384 => write!(f, "SHA384"),
            Self::Sha512 => write!(f, "SHA512"),
        }
    }
}

impl FromStr for ZonemdHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha384" | "1" => Ok(Self::Sha384),
            "sha512" | "2" => Ok(Self::Sha512),
            _ => Err(format!("Unsupported ZONEMD hash algorithm: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;

    #[test]
    fn test_ds_for_ed25519_key() {
        // RFC 8080 section 6.1
        let key = Dnskey {
            flags: 257,
            protocol: 3,
            algorithm: 15,
            public_key: BASE64
                .decode("l02Woi0iS8Aa25FQkUd9RMzZHJpBoRQwAQEX1SxZJA4=")
                .unwrap(),
        };
        let owner: Name = "example.com.".parse().unwrap();
        let ds = DigestType::Sha256.ds_for(&owner, &key);

        assert_eq!(ds.key_tag, 3613);
        assert_eq!(
            hex::encode(&ds.digest),
            "3aa5ab37efce57f737fc1627013fee07bdf241bd10f3b1964ab55c78e79a304b"
        );
    }

    #[test]
    fn test_zonemd_hash_names() {
        assert_eq!("SHA384".parse::<ZonemdHash>().unwrap(), ZonemdHash::Sha384);
        assert_eq!("sha-512".parse::<ZonemdHash>().unwrap(), ZonemdHash::Sha512);
        assert!("md5".parse::<ZonemdHash>().is_err());
    }
}
