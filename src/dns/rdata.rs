use std::collections::BTreeSet;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDateTime};

use super::constants::MAX_CHARACTER_STRING_LEN;
use super::{Name, RecordType};
use crate::dnssec::key_tag::calculate_key_tag;

/// Record data in typed form.
///
/// Every variant can be parsed from zone file tokens, printed back in
/// presentation format and encoded to (canonical) wire format. Types
/// without a dedicated variant are only accepted in the RFC 3597 `\#`
/// syntax and kept as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(Name),
    Cname(Name),
    Ptr(Name),
    Dname(Name),
    Mx {
        preference: u16,
        exchange: Name,
    },
    Soa(Soa),
    Txt(Vec<Vec<u8>>),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },
    Caa {
        flags: u8,
        tag: String,
        value: Vec<u8>,
    },
    Sshfp {
        algorithm: u8,
        fingerprint_type: u8,
        fingerprint: Vec<u8>,
    },
    Tlsa {
        usage: u8,
        selector: u8,
        matching_type: u8,
        data: Vec<u8>,
    },
    Ds(Ds),
    Dnskey(Dnskey),
    Rrsig(Rrsig),
    Nsec(Nsec),
    Nsec3(Nsec3),
    Nsec3Param(Nsec3Param),
    Zonemd(Zonemd),
    Unknown(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Soa {
    pub mname: Name,
    pub rname: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ds {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dnskey {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
}

impl Dnskey {
    /// Zone Key flag (bit 7)
    pub const ZONE_KEY: u16 = 0x0100;
    /// Secure Entry Point flag (bit 15)
    pub const SEP: u16 = 0x0001;
    /// Revoked flag (RFC 5011)
    pub const REVOKE: u16 = 0x0080;

    pub fn key_tag(&self) -> u16 {
        calculate_key_tag(self.flags, self.protocol, self.algorithm, &self.public_key)
    }

    pub fn is_zone_key(&self) -> bool {
        self.flags & Self::ZONE_KEY != 0
    }

    pub fn is_sep(&self) -> bool {
        self.flags & Self::SEP != 0
    }

    pub fn is_revoked(&self) -> bool {
        self.flags & Self::REVOKE != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rrsig {
    pub type_covered: RecordType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer_name: Name,
    pub signature: Vec<u8>,
}

impl Rrsig {
    /// RDATA up to but excluding the signature field, signer name in
    /// canonical form (RFC 4034 section 3.1.8.1).
    pub fn write_signed_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.type_covered.to_u16().to_be_bytes());
        out.push(self.algorithm);
        out.push(self.labels);
        out.extend_from_slice(&self.original_ttl.to_be_bytes());
        out.extend_from_slice(&self.expiration.to_be_bytes());
        out.extend_from_slice(&self.inception.to_be_bytes());
        out.extend_from_slice(&self.key_tag.to_be_bytes());
        self.signer_name.write_wire(out, true);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec {
    pub next_name: Name,
    pub types: TypeBitmap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec3 {
    pub hash_algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    pub next_hashed_owner: Vec<u8>,
    pub types: TypeBitmap,
}

impl Nsec3 {
    /// Opt-Out flag (RFC 5155 section 3.1.2.1)
    pub const OPT_OUT: u8 = 0x01;

    pub fn opt_out(&self) -> bool {
        self.flags & Self::OPT_OUT != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec3Param {
    pub hash_algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zonemd {
    pub serial: u32,
    pub scheme: u8,
    pub hash_algorithm: u8,
    pub digest: Vec<u8>,
}

/// The set of types present at a name, as carried by NSEC and NSEC3.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeBitmap(BTreeSet<RecordType>);

impl TypeBitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rtype: RecordType) {
        self.0.insert(rtype);
    }

    pub fn contains(&self, rtype: RecordType) -> bool {
        self.0.contains(&rtype)
    }

    pub fn iter(&self) -> impl Iterator<Item = RecordType> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Window block encoding of RFC 4034 section 4.1.2
    pub fn write_wire(&self, out: &mut Vec<u8>) {
        let mut window: Option<u8> = None;
        let mut bits = [0u8; 32];
        let mut used = 0usize;

        for rtype in &self.0 {
            let code = rtype.to_u16();
            let this_window = (code >> 8) as u8;
            if window != Some(this_window) {
                if let Some(w) = window {
                    out.push(w);
                    out.push(used as u8);
                    out.extend_from_slice(&bits[..used]);
                }
                window = Some(this_window);
                bits = [0u8; 32];
                used = 0;
            }
            let low = (code & 0xff) as usize;
            bits[low / 8] |= 0x80 >> (low % 8);
            used = used.max(low / 8 + 1);
        }

        if let Some(w) = window {
            out.push(w);
            out.push(used as u8);
            out.extend_from_slice(&bits[..used]);
        }
    }
}

impl FromIterator<RecordType> for TypeBitmap {
    fn from_iter<T: IntoIterator<Item = RecordType>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for TypeBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for rtype in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}", rtype)?;
            first = false;
        }
        Ok(())
    }
}

//------------ Parsing -------------------------------------------------------

/// Cursor over the RDATA tokens of one record
struct Fields<'a> {
    rtype: RecordType,
    tokens: &'a [String],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(rtype: RecordType, tokens: &'a [String]) -> Self {
        Self {
            rtype,
            tokens,
            pos: 0,
        }
    }

    fn next(&mut self, what: &str) -> Result<&'a str, String> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| format!("{} record is missing its {}", self.rtype, what))?;
        self.pos += 1;
        Ok(token.as_str())
    }

    fn rest(&mut self) -> &'a [String] {
        let rest = &self.tokens[self.pos.min(self.tokens.len())..];
        self.pos = self.tokens.len();
        rest
    }

    fn number<T: std::str::FromStr>(&mut self, what: &str) -> Result<T, String> {
        let token = self.next(what)?;
        token
            .parse::<T>()
            .map_err(|_| format!("Invalid {} {} value: {}", self.rtype, what, token))
    }

    fn name(&mut self, origin: &Name, what: &str) -> Result<Name, String> {
        Name::parse(self.next(what)?, Some(origin))
    }

    fn finish(&self) -> Result<(), String> {
        if self.pos < self.tokens.len() {
            return Err(format!(
                "Trailing data in {} record: {}",
                self.rtype,
                self.tokens[self.pos..].join(" ")
            ));
        }
        Ok(())
    }
}

fn join_hex(tokens: &[String], what: &str) -> Result<Vec<u8>, String> {
    let joined: String = tokens.concat();
    hex::decode(&joined).map_err(|_| format!("Invalid hex in {}: {}", what, joined))
}

fn join_base64(tokens: &[String], what: &str) -> Result<Vec<u8>, String> {
    let joined: String = tokens.concat();
    BASE64
        .decode(joined.as_bytes())
        .map_err(|_| format!("Invalid base64 in {}", what))
}

fn parse_salt(token: &str) -> Result<Vec<u8>, String> {
    if token == "-" {
        return Ok(Vec::new());
    }
    hex::decode(token).map_err(|_| format!("Invalid NSEC3 salt: {}", token))
}

fn format_salt(salt: &[u8]) -> String {
    if salt.is_empty() {
        "-".to_string()
    } else {
        hex::encode_upper(salt)
    }
}

/// Decode a character-string token, quoted or bare, resolving escapes
pub fn parse_character_string(token: &str) -> Result<Vec<u8>, String> {
    let inner = if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        &token[1..token.len() - 1]
    } else {
        token
    };

    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if bytes.len() > i + 3
                && bytes[i + 1..i + 4].iter().all(u8::is_ascii_digit)
            {
                let value = (bytes[i + 1] - b'0') as u16 * 100
                    + (bytes[i + 2] - b'0') as u16 * 10
                    + (bytes[i + 3] - b'0') as u16;
                if value > 255 {
                    return Err(format!("Invalid escape in string: {}", token));
                }
                out.push(value as u8);
                i += 4;
                continue;
            }
            if let Some(&next) = bytes.get(i + 1) {
                out.push(next);
                i += 2;
                continue;
            }
            return Err(format!("Dangling escape in string: {}", token));
        }
        out.push(bytes[i]);
        i += 1;
    }

    if out.len() > MAX_CHARACTER_STRING_LEN {
        return Err(format!(
            "Character string longer than {} octets",
            MAX_CHARACTER_STRING_LEN
        ));
    }
    Ok(out)
}

fn format_character_string(data: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("\"")?;
    for &b in data {
        match b {
            b'"' | b'\\' => write!(f, "\\{}", b as char)?,
            0x20..=0x7e => write!(f, "{}", b as char)?,
            _ => write!(f, "\\{:03}", b)?,
        }
    }
    f.write_str("\"")
}

/// Parse an RRSIG timestamp, either `YYYYMMDDHHmmSS` or seconds since the
/// epoch.
pub fn parse_timestamp(text: &str) -> Result<u32, String> {
    if text.len() == 14 && text.bytes().all(|b| b.is_ascii_digit()) {
        let parsed = NaiveDateTime::parse_from_str(text, "%Y%m%d%H%M%S")
            .map_err(|e| format!("Invalid timestamp {}: {}", text, e))?;
        let secs = parsed.and_utc().timestamp();
        return u32::try_from(secs).map_err(|_| format!("Timestamp out of range: {}", text));
    }
    text.parse::<u32>()
        .map_err(|_| format!("Invalid timestamp: {}", text))
}

/// Format an RRSIG timestamp as `YYYYMMDDHHmmSS`
pub fn format_timestamp(secs: u32) -> String {
    DateTime::from_timestamp(i64::from(secs), 0)
        .map(|t| t.format("%Y%m%d%H%M%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn base32hex_encode(data: &[u8]) -> String {
    base32::encode(base32::Alphabet::Rfc4648Hex { padding: false }, data).to_lowercase()
}

/// Decode the base32hex form used for NSEC3 hashed owner names
pub fn base32hex_decode(text: &str) -> Option<Vec<u8>> {
    base32::decode(
        base32::Alphabet::Rfc4648Hex { padding: false },
        &text.to_ascii_uppercase(),
    )
}

/// Encode an NSEC3 hash as a lowercase base32hex label
pub fn nsec3_label(hash: &[u8]) -> String {
    base32hex_encode(hash)
}

impl RData {
    /// Parse RDATA tokens of type `rtype`, resolving relative names
    /// against `origin`.
    pub fn parse(rtype: RecordType, tokens: &[String], origin: &Name) -> Result<RData, String> {
        if tokens.first().map(String::as_str) == Some("\\#") {
            return Self::parse_generic(tokens);
        }

        let mut fields = Fields::new(rtype, tokens);
        let rdata = match rtype {
            RecordType::A => {
                let text = fields.next("address")?;
                RData::A(
                    text.parse()
                        .map_err(|_| format!("Invalid IPv4 address: {}", text))?,
                )
            }
            RecordType::AAAA => {
                let text = fields.next("address")?;
                RData::Aaaa(
                    text.parse()
                        .map_err(|_| format!("Invalid IPv6 address: {}", text))?,
                )
            }
            RecordType::NS => RData::Ns(fields.name(origin, "name server")?),
            RecordType::CNAME => RData::Cname(fields.name(origin, "target")?),
            RecordType::PTR => RData::Ptr(fields.name(origin, "target")?),
            RecordType::DNAME => RData::Dname(fields.name(origin, "target")?),
            RecordType::MX => RData::Mx {
                preference: fields.number("preference")?,
                exchange: fields.name(origin, "exchange")?,
            },
            RecordType::SOA => RData::Soa(Soa {
                mname: fields.name(origin, "mname")?,
                rname: fields.name(origin, "rname")?,
                serial: fields.number("serial")?,
                refresh: parse_ttl_field(fields.next("refresh")?)?,
                retry: parse_ttl_field(fields.next("retry")?)?,
                expire: parse_ttl_field(fields.next("expire")?)?,
                minimum: parse_ttl_field(fields.next("minimum")?)?,
            }),
            RecordType::TXT => {
                let strings = fields
                    .rest()
                    .iter()
                    .map(|t| parse_character_string(t))
                    .collect::<Result<Vec<_>, _>>()?;
                if strings.is_empty() {
                    return Err("TXT record requires at least one string".to_string());
                }
                RData::Txt(strings)
            }
            RecordType::SRV => RData::Srv {
                priority: fields.number("priority")?,
                weight: fields.number("weight")?,
                port: fields.number("port")?,
                target: fields.name(origin, "target")?,
            },
            RecordType::CAA => {
                let flags = fields.number("flags")?;
                let tag = fields.next("tag")?.to_string();
                if tag.is_empty() || !tag.bytes().all(|b| b.is_ascii_alphanumeric()) {
                    return Err(format!("Invalid CAA tag: {}", tag));
                }
                let value = parse_character_string(fields.next("value")?)?;
                RData::Caa { flags, tag, value }
            }
            RecordType::SSHFP => RData::Sshfp {
                algorithm: fields.number("algorithm")?,
                fingerprint_type: fields.number("fingerprint type")?,
                fingerprint: join_hex(fields.rest(), "SSHFP fingerprint")?,
            },
            RecordType::TLSA => RData::Tlsa {
                usage: fields.number("usage")?,
                selector: fields.number("selector")?,
                matching_type: fields.number("matching type")?,
                data: join_hex(fields.rest(), "TLSA data")?,
            },
            RecordType::DS | RecordType::CDS => RData::Ds(Ds {
                key_tag: fields.number("key tag")?,
                algorithm: fields.number("algorithm")?,
                digest_type: fields.number("digest type")?,
                digest: join_hex(fields.rest(), "DS digest")?,
            }),
            RecordType::DNSKEY | RecordType::CDNSKEY => RData::Dnskey(Dnskey {
                flags: fields.number("flags")?,
                protocol: fields.number("protocol")?,
                algorithm: fields.number("algorithm")?,
                public_key: join_base64(fields.rest(), "DNSKEY public key")?,
            }),
            RecordType::RRSIG => {
                let covered = fields.next("type covered")?;
                RData::Rrsig(Rrsig {
                    type_covered: covered.parse()?,
                    algorithm: fields.number("algorithm")?,
                    labels: fields.number("labels")?,
                    original_ttl: fields.number("original TTL")?,
                    expiration: parse_timestamp(fields.next("expiration")?)?,
                    inception: parse_timestamp(fields.next("inception")?)?,
                    key_tag: fields.number("key tag")?,
                    signer_name: fields.name(origin, "signer name")?,
                    signature: join_base64(fields.rest(), "RRSIG signature")?,
                })
            }
            RecordType::NSEC => RData::Nsec(Nsec {
                next_name: fields.name(origin, "next name")?,
                types: parse_type_list(fields.rest())?,
            }),
            RecordType::NSEC3 => {
                let hash_algorithm = fields.number("hash algorithm")?;
                let flags = fields.number("flags")?;
                let iterations = fields.number("iterations")?;
                let salt = parse_salt(fields.next("salt")?)?;
                let next = fields.next("next hashed owner")?;
                let next_hashed_owner = base32hex_decode(next)
                    .ok_or_else(|| format!("Invalid NSEC3 next hashed owner: {}", next))?;
                RData::Nsec3(Nsec3 {
                    hash_algorithm,
                    flags,
                    iterations,
                    salt,
                    next_hashed_owner,
                    types: parse_type_list(fields.rest())?,
                })
            }
            RecordType::NSEC3PARAM => RData::Nsec3Param(Nsec3Param {
                hash_algorithm: fields.number("hash algorithm")?,
                flags: fields.number("flags")?,
                iterations: fields.number("iterations")?,
                salt: parse_salt(fields.next("salt")?)?,
            }),
            RecordType::ZONEMD => RData::Zonemd(Zonemd {
                serial: fields.number("serial")?,
                scheme: fields.number("scheme")?,
                hash_algorithm: fields.number("hash algorithm")?,
                digest: join_hex(fields.rest(), "ZONEMD digest")?,
            }),
            other => {
                return Err(format!(
                    "Unsupported record type for zone files: {} (use \\# syntax)",
                    other
                ));
            }
        };

        fields.finish()?;
        Ok(rdata)
    }

    /// RFC 3597 generic syntax: `\# <length> <hex>...`
    fn parse_generic(tokens: &[String]) -> Result<RData, String> {
        let length: usize = tokens
            .get(1)
            .ok_or_else(|| "Generic RDATA is missing its length".to_string())?
            .parse()
            .map_err(|_| "Invalid generic RDATA length".to_string())?;
        let data = join_hex(&tokens[2..], "generic RDATA")?;
        if data.len() != length {
            return Err(format!(
                "Generic RDATA length {} does not match {} octets of data",
                length,
                data.len()
            ));
        }
        Ok(RData::Unknown(data))
    }

    /// Append the wire form. With `canonical` set, embedded names are
    /// lowercased for the types RFC 4034 section 6.2 lists.
    pub fn write_wire(&self, out: &mut Vec<u8>, canonical: bool) {
        match self {
            RData::A(addr) => out.extend_from_slice(&addr.octets()),
            RData::Aaaa(addr) => out.extend_from_slice(&addr.octets()),
            RData::Ns(name) | RData::Cname(name) | RData::Ptr(name) | RData::Dname(name) => {
                name.write_wire(out, canonical)
            }
            RData::Mx {
                preference,
                exchange,
            } => {
                out.extend_from_slice(&preference.to_be_bytes());
                exchange.write_wire(out, canonical);
            }
            RData::Soa(soa) => {
                soa.mname.write_wire(out, canonical);
                soa.rname.write_wire(out, canonical);
                for value in [soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum] {
                    out.extend_from_slice(&value.to_be_bytes());
                }
            }
            RData::Txt(strings) => {
                for s in strings {
                    out.push(s.len() as u8);
                    out.extend_from_slice(s);
                }
            }
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                out.extend_from_slice(&priority.to_be_bytes());
                out.extend_from_slice(&weight.to_be_bytes());
                out.extend_from_slice(&port.to_be_bytes());
                target.write_wire(out, canonical);
            }
            RData::Caa { flags, tag, value } => {
                out.push(*flags);
                out.push(tag.len() as u8);
                out.extend_from_slice(tag.as_bytes());
                out.extend_from_slice(value);
            }
            RData::Sshfp {
                algorithm,
                fingerprint_type,
                fingerprint,
            } => {
                out.push(*algorithm);
                out.push(*fingerprint_type);
                out.extend_from_slice(fingerprint);
            }
            RData::Tlsa {
                usage,
                selector,
                matching_type,
                data,
            } => {
                out.push(*usage);
                out.push(*selector);
                out.push(*matching_type);
                out.extend_from_slice(data);
            }
            RData::Ds(ds) => {
                out.extend_from_slice(&ds.key_tag.to_be_bytes());
                out.push(ds.algorithm);
                out.push(ds.digest_type);
                out.extend_from_slice(&ds.digest);
            }
            RData::Dnskey(key) => {
                out.extend_from_slice(&key.flags.to_be_bytes());
                out.push(key.protocol);
                out.push(key.algorithm);
                out.extend_from_slice(&key.public_key);
            }
            RData::Rrsig(sig) => {
                out.extend_from_slice(&sig.type_covered.to_u16().to_be_bytes());
                out.push(sig.algorithm);
                out.push(sig.labels);
                out.extend_from_slice(&sig.original_ttl.to_be_bytes());
                out.extend_from_slice(&sig.expiration.to_be_bytes());
                out.extend_from_slice(&sig.inception.to_be_bytes());
                out.extend_from_slice(&sig.key_tag.to_be_bytes());
                sig.signer_name.write_wire(out, canonical);
                out.extend_from_slice(&sig.signature);
            }
            // RFC 6840 section 5.1: the NSEC next name is not lowercased
            RData::Nsec(nsec) => {
                nsec.next_name.write_wire(out, false);
                nsec.types.write_wire(out);
            }
            RData::Nsec3(nsec3) => {
                out.push(nsec3.hash_algorithm);
                out.push(nsec3.flags);
                out.extend_from_slice(&nsec3.iterations.to_be_bytes());
                out.push(nsec3.salt.len() as u8);
                out.extend_from_slice(&nsec3.salt);
                out.push(nsec3.next_hashed_owner.len() as u8);
                out.extend_from_slice(&nsec3.next_hashed_owner);
                nsec3.types.write_wire(out);
            }
            RData::Nsec3Param(param) => {
                out.push(param.hash_algorithm);
                out.push(param.flags);
                out.extend_from_slice(&param.iterations.to_be_bytes());
                out.push(param.salt.len() as u8);
                out.extend_from_slice(&param.salt);
            }
            RData::Zonemd(zonemd) => {
                out.extend_from_slice(&zonemd.serial.to_be_bytes());
                out.push(zonemd.scheme);
                out.push(zonemd.hash_algorithm);
                out.extend_from_slice(&zonemd.digest);
            }
            RData::Unknown(data) => out.extend_from_slice(data),
        }
    }

    /// Wire form as a new buffer
    pub fn to_wire(&self, canonical: bool) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_wire(&mut out, canonical);
        out
    }

    pub fn as_soa(&self) -> Option<&Soa> {
        match self {
            RData::Soa(soa) => Some(soa),
            _ => None,
        }
    }

    pub fn as_dnskey(&self) -> Option<&Dnskey> {
        match self {
            RData::Dnskey(key) => Some(key),
            _ => None,
        }
    }

    pub fn as_rrsig(&self) -> Option<&Rrsig> {
        match self {
            RData::Rrsig(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn as_nsec(&self) -> Option<&Nsec> {
        match self {
            RData::Nsec(nsec) => Some(nsec),
            _ => None,
        }
    }

    pub fn as_nsec3(&self) -> Option<&Nsec3> {
        match self {
            RData::Nsec3(nsec3) => Some(nsec3),
            _ => None,
        }
    }

    pub fn as_nsec3param(&self) -> Option<&Nsec3Param> {
        match self {
            RData::Nsec3Param(param) => Some(param),
            _ => None,
        }
    }

    pub fn as_zonemd(&self) -> Option<&Zonemd> {
        match self {
            RData::Zonemd(zonemd) => Some(zonemd),
            _ => None,
        }
    }
}

fn parse_type_list(tokens: &[String]) -> Result<TypeBitmap, String> {
    tokens.iter().map(|t| t.parse::<RecordType>()).collect()
}

/// Parse a TTL-like field: plain seconds or BIND style units (`1h30m`).
pub fn parse_ttl_field(text: &str) -> Result<u32, String> {
    if let Ok(value) = text.parse::<u32>() {
        return Ok(value);
    }

    let mut total: u64 = 0;
    let mut current: u64 = 0;
    let mut seen_digit = false;
    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            current = current * 10 + u64::from(digit);
            seen_digit = true;
            continue;
        }
        let unit = match c.to_ascii_lowercase() {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            'w' => 604800,
            _ => return Err(format!("Invalid TTL value: {}", text)),
        };
        if !seen_digit {
            return Err(format!("Invalid TTL value: {}", text));
        }
        total += current * unit;
        current = 0;
        seen_digit = false;
    }
    if seen_digit {
        total += current;
    }
    u32::try_from(total).map_err(|_| format!("TTL out of range: {}", text))
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RData::A(addr) => write!(f, "{}", addr),
            RData::Aaaa(addr) => write!(f, "{}", addr),
            RData::Ns(name) | RData::Cname(name) | RData::Ptr(name) | RData::Dname(name) => {
                write!(f, "{}", name)
            }
            RData::Mx {
                preference,
                exchange,
            } => write!(f, "{} {}", preference, exchange),
            RData::Soa(soa) => write!(
                f,
                "{} {} {} {} {} {} {}",
                soa.mname, soa.rname, soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum
            ),
            RData::Txt(strings) => {
                for (i, s) in strings.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    format_character_string(s, f)?;
                }
                Ok(())
            }
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => write!(f, "{} {} {} {}", priority, weight, port, target),
            RData::Caa { flags, tag, value } => {
                write!(f, "{} {} ", flags, tag)?;
                format_character_string(value, f)
            }
            RData::Sshfp {
                algorithm,
                fingerprint_type,
                fingerprint,
            } => write!(
                f,
                "{} {} {}",
                algorithm,
                fingerprint_type,
                hex::encode_upper(fingerprint)
            ),
            RData::Tlsa {
                usage,
                selector,
                matching_type,
                data,
            } => write!(
                f,
                "{} {} {} {}",
                usage,
                selector,
                matching_type,
                hex::encode_upper(data)
            ),
            RData::Ds(ds) => write!(
                f,
                "{} {} {} {}",
                ds.key_tag,
                ds.algorithm,
                ds.digest_type,
                hex::encode_upper(&ds.digest)
            ),
            RData::Dnskey(key) => write!(
                f,
                "{} {} {} {}",
                key.flags,
                key.protocol,
                key.algorithm,
                BASE64.encode(&key.public_key)
            ),
            RData::Rrsig(sig) => write!(
                f,
                "{} {} {} {} {} {} {} {} {}",
                sig.type_covered,
                sig.algorithm,
                sig.labels,
                sig.original_ttl,
                format_timestamp(sig.expiration),
                format_timestamp(sig.inception),
                sig.key_tag,
                sig.signer_name,
                BASE64.encode(&sig.signature)
            ),
            RData::Nsec(nsec) => {
                write!(f, "{}", nsec.next_name)?;
                if !nsec.types.is_empty() {
                    write!(f, " {}", nsec.types)?;
                }
                Ok(())
            }
            RData::Nsec3(nsec3) => {
                write!(
                    f,
                    "{} {} {} {} {}",
                    nsec3.hash_algorithm,
                    nsec3.flags,
                    nsec3.iterations,
                    format_salt(&nsec3.salt),
                    base32hex_encode(&nsec3.next_hashed_owner)
                )?;
                if !nsec3.types.is_empty() {
                    write!(f, " {}", nsec3.types)?;
                }
                Ok(())
            }
            RData::Nsec3Param(param) => write!(
                f,
                "{} {} {} {}",
                param.hash_algorithm,
                param.flags,
                param.iterations,
                format_salt(&param.salt)
            ),
            RData::Zonemd(zonemd) => write!(
                f,
                "{} {} {} {}",
                zonemd.serial,
                zonemd.scheme,
                zonemd.hash_algorithm,
                hex::encode_upper(&zonemd.digest)
            ),
            RData::Unknown(data) => {
                write!(f, "\\# {}", data.len())?;
                if !data.is_empty() {
                    write!(f, " {}", hex::encode_upper(data))?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    fn origin() -> Name {
        "example.com.".parse().unwrap()
    }

    #[test]
    fn test_parse_soa_with_units() {
        let rdata = RData::parse(
            RecordType::SOA,
            &tokens("ns1 hostmaster 2024010101 1h 15m 1w 300"),
            &origin(),
        )
        .unwrap();
        let soa = rdata.as_soa().unwrap();
        assert_eq!(soa.mname.to_string(), "ns1.example.com.");
        assert_eq!(soa.refresh, 3600);
        assert_eq!(soa.retry, 900);
        assert_eq!(soa.expire, 604800);
        assert_eq!(soa.minimum, 300);
    }

    #[test]
    fn test_canonical_wire_lowercases_names() {
        let rdata = RData::parse(RecordType::NS, &tokens("NS1.Example.COM."), &origin()).unwrap();
        assert_eq!(rdata.to_wire(true), b"\x03ns1\x07example\x03com\x00".to_vec());
        assert_eq!(rdata.to_wire(false), b"\x03NS1\x07Example\x03COM\x00".to_vec());
    }

    #[test]
    fn test_nsec_next_name_keeps_case() {
        let rdata =
            RData::parse(RecordType::NSEC, &tokens("WWW.example.com. A RRSIG NSEC"), &origin())
                .unwrap();
        assert!(rdata.to_wire(true).starts_with(b"\x03WWW"));
    }

    #[test]
    fn test_type_bitmap_wire() {
        // RFC 4034 section 4.3 example: A MX RRSIG NSEC TYPE1234
        let bitmap: TypeBitmap = [
            RecordType::A,
            RecordType::MX,
            RecordType::RRSIG,
            RecordType::NSEC,
            RecordType::Unknown(1234),
        ]
        .into_iter()
        .collect();
        let mut wire = Vec::new();
        bitmap.write_wire(&mut wire);
        let expected = hex::decode("0006400100000003041b000000000000000000000000000000000000000000000000000020").unwrap();
        assert_eq!(wire, expected);
    }

    #[test]
    fn test_txt_strings_and_escapes() {
        let rdata = RData::parse(
            RecordType::TXT,
            &["\"hello world\"".to_string(), "\"a\\\"b\"".to_string()],
            &origin(),
        )
        .unwrap();
        assert_eq!(
            rdata,
            RData::Txt(vec![b"hello world".to_vec(), b"a\"b".to_vec()])
        );
        assert_eq!(rdata.to_string(), "\"hello world\" \"a\\\"b\"");
    }

    #[test]
    fn test_generic_rdata() {
        let rdata =
            RData::parse(RecordType::Unknown(65280), &tokens("\\# 4 0A000001"), &origin()).unwrap();
        assert_eq!(rdata, RData::Unknown(vec![10, 0, 0, 1]));
        assert_eq!(rdata.to_string(), "\\# 4 0A000001");
        assert!(
            RData::parse(RecordType::Unknown(65280), &tokens("\\# 3 0A000001"), &origin()).is_err()
        );
    }

    #[test]
    fn test_rrsig_timestamps() {
        assert_eq!(parse_timestamp("20240101000000").unwrap(), 1704067200);
        assert_eq!(format_timestamp(1704067200), "20240101000000");
        assert_eq!(parse_timestamp("1704067200").unwrap(), 1704067200);
        assert!(parse_timestamp("2024").is_ok());
        assert!(parse_timestamp("notatime").is_err());
    }

    #[test]
    fn test_nsec3_presentation() {
        let rdata = RData::parse(
            RecordType::NSEC3,
            &tokens("1 1 12 AABBCCDD 2T7B4G4VSA5SMI47K61MV5BV1A22BOJR A RRSIG"),
            &origin(),
        )
        .unwrap();
        let nsec3 = rdata.as_nsec3().unwrap();
        assert!(nsec3.opt_out());
        assert_eq!(nsec3.next_hashed_owner.len(), 20);
        assert_eq!(
            rdata.to_string(),
            "1 1 12 AABBCCDD 2t7b4g4vsa5smi47k61mv5bv1a22bojr A RRSIG"
        );
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(RData::parse(RecordType::MX, &tokens("10"), &origin()).is_err());
        assert!(RData::parse(RecordType::A, &tokens("192.0.2.1 extra"), &origin()).is_err());
        assert!(RData::parse(RecordType::A, &tokens("300.0.2.1"), &origin()).is_err());
    }
}
