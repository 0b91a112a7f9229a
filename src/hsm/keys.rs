use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dns::Dnskey;
use crate::dnssec::{DnsSecAlgorithm, calculate_key_tag};

/// Whether a key signs the zone data or the DNSKEY RRset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    Zsk,
    Ksk,
}

impl KeyRole {
    /// DNSKEY flags: zone key, plus SEP for a KSK
    pub fn flags(self) -> u16 {
        match self {
            Self::Zsk => Dnskey::ZONE_KEY,
            Self::Ksk => Dnskey::ZONE_KEY | Dnskey::SEP,
        }
    }

    /// Prefix of the token object id, which records the role on the token
    pub fn id_prefix(self) -> &'static [u8] {
        match self {
            Self::Zsk => b"zsk-",
            Self::Ksk => b"ksk-",
        }
    }

    /// Role recorded in a token object id, if any
    pub fn from_key_id(id: &[u8]) -> Option<Self> {
        [Self::Zsk, Self::Ksk]
            .into_iter()
            .find(|role| id.starts_with(role.id_prefix()))
    }
}

/// Object id for a new key: role prefix, algorithm number, then `random`
/// (for example `ksk-13-0a1b2c`)
pub fn new_key_id(role: KeyRole, algorithm: DnsSecAlgorithm, random: &str) -> Vec<u8> {
    let mut id = role.id_prefix().to_vec();
    id.extend_from_slice(format!("{}-{}", algorithm.to_u8(), random).as_bytes());
    id
}

/// Algorithm recorded in an object id made by [`new_key_id`]. Tokens that
/// cannot tell RSA variants apart from the key material read it from here.
pub fn key_id_algorithm(id: &[u8]) -> Option<DnsSecAlgorithm> {
    let role = KeyRole::from_key_id(id)?;
    let rest = &id[role.id_prefix().len()..];
    let end = rest.iter().position(|&b| b == b'-')?;
    let number = std::str::from_utf8(&rest[..end]).ok()?;
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    DnsSecAlgorithm::from_u8(number.parse().ok()?)
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zsk => write!(f, "ZSK"),
            Self::Ksk => write!(f, "KSK"),
        }
    }
}

/// A key pair as a token reports it. The public key is already in DNSKEY
/// wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenKey {
    pub label: String,
    pub id: Vec<u8>,
    pub algorithm: DnsSecAlgorithm,
    pub public_key: Vec<u8>,
}

/// Reference to a key pair held by the HSM. Carries only public material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    pub label: String,
    pub id: Vec<u8>,
    pub algorithm: DnsSecAlgorithm,
    pub role: KeyRole,
    pub key_tag: u16,
    pub flags: u16,
    pub public_key: Vec<u8>,
}

impl KeyHandle {
    pub fn new(role: KeyRole, key: TokenKey) -> Self {
        let flags = role.flags();
        let key_tag = calculate_key_tag(flags, 3, key.algorithm.to_u8(), &key.public_key);
        Self {
            label: key.label,
            id: key.id,
            algorithm: key.algorithm,
            role,
            key_tag,
            flags,
            public_key: key.public_key,
        }
    }

    /// The DNSKEY record data for this key
    pub fn dnskey(&self) -> Dnskey {
        Dnskey {
            flags: self.flags,
            protocol: 3,
            algorithm: self.algorithm.to_u8(),
            public_key: self.public_key.clone(),
        }
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (tag {}, {})",
            self.role, self.label, self.key_tag, self.algorithm
        )
    }
}
