//! Signed zone verification.
//!
//! Every check runs to completion and records what it finds; nothing here
//! returns early on the first problem. An empty report is a pass.

use std::collections::BTreeMap;
use std::fmt;

use ring::signature::{RsaPublicKeyComponents, UnparsedPublicKey};
use tracing::{debug, info, trace};

use super::algorithm::DnsSecAlgorithm;
use super::canonical::rrsig_signed_data;
use super::context::Nsec3Params;
use super::denial::{nsec3_chain, nsec_chain};
use super::digest::ZonemdHash;
use super::errors::{DnsSecError, Result};
use super::zonemd::ZoneDigest;
use crate::dns::{Dnskey, Name, RData, RRset, RecordType, Rrsig};
use crate::zone::Zone;

/// What is wrong at one owner/type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindingKind {
    /// No signature by a trusted key covers the RRset
    MissingSignature,
    /// The signing key is not among the trusted keys
    UnknownKey { key_tag: u16, algorithm: u8 },
    InvalidSignature { key_tag: u16, reason: String },
    NotYetValid { key_tag: u16, inception: u32 },
    Expired { key_tag: u16, expiration: u32 },
    /// An RRSIG covering an RRset the zone does not have
    OrphanSignature { key_tag: u16 },
    /// Neither NSEC nor NSEC3 records are present
    NoDenialChain,
    /// An owner that needs a denial record has none
    MissingDenial,
    /// A denial record where none belongs
    UnexpectedDenial,
    /// A denial record whose next owner, bitmap or parameters are wrong
    DenialMismatch(String),
    /// The DNSKEY RRset carries no valid signature by a trusted SEP key
    DnskeyNotSignedBySep,
    ZonemdMismatch,
    ZonemdUnsupported { scheme: u8, hash_algorithm: u8 },
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSignature => write!(f, "not signed by a trusted key"),
            Self::UnknownKey { key_tag, algorithm } => {
                write!(f, "signed by unknown key {} (algorithm {})", key_tag, algorithm)
            }
            Self::InvalidSignature { key_tag, reason } => {
                write!(f, "signature by key {} is invalid: {}", key_tag, reason)
            }
            Self::NotYetValid { key_tag, inception } => write!(
                f,
                "signature by key {} not valid before {}",
                key_tag,
                crate::dns::rdata::format_timestamp(*inception)
            ),
            Self::Expired {
                key_tag,
                expiration,
            } => write!(
                f,
                "signature by key {} expired at {}",
                key_tag,
                crate::dns::rdata::format_timestamp(*expiration)
            ),
            Self::OrphanSignature { key_tag } => {
                write!(f, "signature by key {} covers a missing RRset", key_tag)
            }
            Self::NoDenialChain => write!(f, "zone has no NSEC or NSEC3 chain"),
            Self::MissingDenial => write!(f, "denial record missing"),
            Self::UnexpectedDenial => write!(f, "unexpected denial record"),
            Self::DenialMismatch(what) => write!(f, "denial record mismatch: {}", what),
            Self::DnskeyNotSignedBySep => write!(f, "DNSKEY RRset not signed by a trusted KSK"),
            Self::ZonemdMismatch => write!(f, "ZONEMD digest does not match the zone"),
            Self::ZonemdUnsupported {
                scheme,
                hash_algorithm,
            } => write!(
                f,
                "ZONEMD scheme {} hash {} is not supported",
                scheme, hash_algorithm
            ),
        }
    }
}

/// One verification finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub owner: Name,
    pub rtype: RecordType,
    pub kind: FindingKind,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.owner, self.rtype, self.kind)
    }
}

/// Outcome of verifying a zone
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub findings: Vec<Finding>,
    pub rrsets_checked: usize,
    pub signatures_checked: usize,
}

impl VerificationReport {
    pub fn is_ok(&self) -> bool {
        self.findings.is_empty()
    }

    fn add(&mut self, owner: &Name, rtype: RecordType, kind: FindingKind) {
        trace!("Finding at {} {}: {}", owner, rtype, kind);
        self.findings.push(Finding {
            owner: owner.clone(),
            rtype,
            kind,
        });
    }
}

/// Zone keys published at the apex: zone-key flag set, not revoked
pub fn zone_keys(zone: &Zone) -> Vec<Dnskey> {
    zone.get(zone.origin(), RecordType::DNSKEY)
        .map(|set| {
            set.rdata()
                .filter_map(RData::as_dnskey)
                .filter(|key| key.is_zone_key() && !key.is_revoked())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Strip leading zero octets; ring rejects padded big-endian integers
fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Split an RFC 3110 RSA public key into modulus and exponent
fn rsa_components(key: &[u8]) -> Result<RsaPublicKeyComponents<&[u8]>> {
    let (exponent_len, rest) = match key {
        [0, hi, lo, rest @ ..] => (usize::from(u16::from_be_bytes([*hi, *lo])), rest),
        [len, rest @ ..] if *len != 0 => (usize::from(*len), rest),
        _ => return Err(DnsSecError::InvalidPublicKey),
    };
    if rest.len() <= exponent_len {
        return Err(DnsSecError::InvalidPublicKey);
    }
    let (e, n) = rest.split_at(exponent_len);
    Ok(RsaPublicKeyComponents {
        n: trim_leading_zeros(n),
        e: trim_leading_zeros(e),
    })
}

/// Check one signature over `rrset` against `key`
pub fn verify_rrsig(key: &Dnskey, rrsig: &Rrsig, rrset: &RRset) -> Result<()> {
    let algorithm = DnsSecAlgorithm::from_u8(rrsig.algorithm)
        .ok_or(DnsSecError::UnsupportedAlgorithm(rrsig.algorithm))?;
    let data = rrsig_signed_data(rrsig, rrset)?;

    if let Some(params) = algorithm.rsa_parameters() {
        return rsa_components(&key.public_key)?
            .verify(params, &data, &rrsig.signature)
            .map_err(|_| DnsSecError::SignatureVerificationFailed);
    }

    let verify_alg = algorithm
        .ring_algorithm()
        .ok_or(DnsSecError::UnsupportedAlgorithm(rrsig.algorithm))?;
    if algorithm.public_key_len() != Some(key.public_key.len()) {
        return Err(DnsSecError::InvalidPublicKey);
    }

    let public_key = if algorithm.is_ecdsa() {
        // ring expects an uncompressed SEC1 point
        let mut point = Vec::with_capacity(key.public_key.len() + 1);
        point.push(0x04);
        point.extend_from_slice(&key.public_key);
        point
    } else {
        key.public_key.clone()
    };

    UnparsedPublicKey::new(verify_alg, &public_key)
        .verify(&data, &rrsig.signature)
        .map_err(|_| DnsSecError::SignatureVerificationFailed)
}

/// Verifies signed zones at a fixed point in time
#[derive(Debug, Clone)]
pub struct Verifier {
    now: u32,
    clock_skew: u32,
}

impl Verifier {
    /// Verifier judging validity windows at `now`, seconds since the epoch
    pub fn new(now: u32) -> Self {
        Self { now, clock_skew: 0 }
    }

    /// Tolerate clocks that are off by up to `seconds`
    pub fn with_clock_skew(mut self, seconds: u32) -> Self {
        self.clock_skew = seconds;
        self
    }

    pub fn verify(&self, zone: &Zone, trusted_keys: &[Dnskey]) -> VerificationReport {
        let mut report = VerificationReport::default();

        self.check_signatures(zone, trusted_keys, &mut report);
        self.check_dnskey(zone, trusted_keys, &mut report);
        self.check_denial(zone, &mut report);
        self.check_zonemd(zone, &mut report);

        info!(
            "Verified {}: {} RRsets, {} signatures, {} findings",
            zone.origin(),
            report.rrsets_checked,
            report.signatures_checked,
            report.findings.len()
        );
        report
    }

    fn candidates<'k>(trusted: &'k [Dnskey], rrsig: &Rrsig) -> Vec<&'k Dnskey> {
        trusted
            .iter()
            .filter(|key| key.algorithm == rrsig.algorithm && key.key_tag() == rrsig.key_tag)
            .collect()
    }

    /// Whether some candidate key validates the signature. Returns the last
    /// error when none does.
    fn validate(trusted: &[Dnskey], rrsig: &Rrsig, rrset: &RRset) -> Option<Result<()>> {
        let mut last = None;
        for key in Self::candidates(trusted, rrsig) {
            match verify_rrsig(key, rrsig, rrset) {
                Ok(()) => return Some(Ok(())),
                Err(e) => last = Some(Err(e)),
            }
        }
        last
    }

    fn check_window(&self, owner: &Name, rrsig: &Rrsig, report: &mut VerificationReport) {
        let now = u64::from(self.now);
        let skew = u64::from(self.clock_skew);
        if now + skew < u64::from(rrsig.inception) {
            report.add(
                owner,
                rrsig.type_covered,
                FindingKind::NotYetValid {
                    key_tag: rrsig.key_tag,
                    inception: rrsig.inception,
                },
            );
        }
        if now > u64::from(rrsig.expiration) + skew {
            report.add(
                owner,
                rrsig.type_covered,
                FindingKind::Expired {
                    key_tag: rrsig.key_tag,
                    expiration: rrsig.expiration,
                },
            );
        }
    }

    fn signatures_at<'z>(zone: &'z Zone, owner: &Name) -> Vec<&'z Rrsig> {
        zone.get(owner, RecordType::RRSIG)
            .map(|set| set.rdata().filter_map(RData::as_rrsig).collect())
            .unwrap_or_default()
    }

    fn check_signatures(&self, zone: &Zone, trusted: &[Dnskey], report: &mut VerificationReport) {
        // Every RRSIG in the zone, against the RRset it claims to cover
        for sigs in zone.canonical_order().filter(|s| s.rtype == RecordType::RRSIG) {
            for rrsig in sigs.rdata().filter_map(RData::as_rrsig) {
                report.signatures_checked += 1;
                let Some(covered) = zone.get(&sigs.name, rrsig.type_covered) else {
                    report.add(
                        &sigs.name,
                        rrsig.type_covered,
                        FindingKind::OrphanSignature {
                            key_tag: rrsig.key_tag,
                        },
                    );
                    continue;
                };

                if rrsig.signer_name != *zone.origin() {
                    report.add(
                        &sigs.name,
                        rrsig.type_covered,
                        FindingKind::InvalidSignature {
                            key_tag: rrsig.key_tag,
                            reason: format!("signer {} is not the zone apex", rrsig.signer_name),
                        },
                    );
                    continue;
                }

                match Self::validate(trusted, rrsig, covered) {
                    None => report.add(
                        &sigs.name,
                        rrsig.type_covered,
                        FindingKind::UnknownKey {
                            key_tag: rrsig.key_tag,
                            algorithm: rrsig.algorithm,
                        },
                    ),
                    Some(Err(e)) => report.add(
                        &sigs.name,
                        rrsig.type_covered,
                        FindingKind::InvalidSignature {
                            key_tag: rrsig.key_tag,
                            reason: e.to_string(),
                        },
                    ),
                    Some(Ok(())) => {}
                }
                self.check_window(&sigs.name, rrsig, report);
            }
        }

        // Every authoritative RRset needs a signature by a trusted key
        for rrset in zone.authoritative_rrsets() {
            if matches!(rrset.rtype, RecordType::RRSIG | RecordType::DNSKEY) {
                continue;
            }
            report.rrsets_checked += 1;
            let signed = Self::signatures_at(zone, &rrset.name)
                .into_iter()
                .filter(|sig| sig.type_covered == rrset.rtype)
                .any(|sig| !Self::candidates(trusted, sig).is_empty());
            if !signed {
                report.add(&rrset.name, rrset.rtype, FindingKind::MissingSignature);
            }
        }
    }

    fn check_dnskey(&self, zone: &Zone, trusted: &[Dnskey], report: &mut VerificationReport) {
        let apex = zone.origin();
        let sep_keys: Vec<Dnskey> = trusted.iter().filter(|k| k.is_sep()).cloned().collect();

        let signed = zone.get(apex, RecordType::DNSKEY).is_some_and(|dnskeys| {
            report.rrsets_checked += 1;
            Self::signatures_at(zone, apex)
                .into_iter()
                .filter(|sig| sig.type_covered == RecordType::DNSKEY)
                .any(|sig| matches!(Self::validate(&sep_keys, sig, dnskeys), Some(Ok(()))))
        });
        if !signed {
            report.add(apex, RecordType::DNSKEY, FindingKind::DnskeyNotSignedBySep);
        }
    }

    fn check_denial(&self, zone: &Zone, report: &mut VerificationReport) {
        let apex = zone.origin().clone();
        let first_nsec3 = zone
            .canonical_order()
            .filter(|set| set.rtype == RecordType::NSEC3)
            .find_map(|set| set.first().and_then(RData::as_nsec3).cloned());
        let has_nsec = zone.canonical_order().any(|set| set.rtype == RecordType::NSEC);

        if let Some(sample) = first_nsec3 {
            let params = Nsec3Params {
                hash_algorithm: sample.hash_algorithm,
                iterations: sample.iterations,
                salt: sample.salt.clone(),
                opt_out: sample.opt_out(),
            };
            debug!(
                "Checking NSEC3 chain: {} iterations, salt {:?}, opt-out {}",
                params.iterations,
                hex::encode(&params.salt),
                params.opt_out
            );

            match zone
                .get(&apex, RecordType::NSEC3PARAM)
                .and_then(RRset::first)
                .and_then(RData::as_nsec3param)
            {
                Some(param) if *param != params.to_nsec3param() => report.add(
                    &apex,
                    RecordType::NSEC3PARAM,
                    FindingKind::DenialMismatch(
                        "NSEC3PARAM disagrees with the NSEC3 records".to_string(),
                    ),
                ),
                Some(_) => {}
                None => report.add(&apex, RecordType::NSEC3PARAM, FindingKind::MissingDenial),
            }

            match nsec3_chain(zone, &params) {
                Ok(expected) => Self::compare_chain(
                    zone,
                    RecordType::NSEC3,
                    expected.into_iter().map(|(o, r)| (o, RData::Nsec3(r))),
                    report,
                ),
                Err(e) => report.add(
                    &apex,
                    RecordType::NSEC3,
                    FindingKind::DenialMismatch(e.to_string()),
                ),
            }

            // A zone uses one scheme; NSEC records next to NSEC3 are stray
            for set in zone.canonical_order().filter(|s| s.rtype == RecordType::NSEC) {
                report.add(&set.name, RecordType::NSEC, FindingKind::UnexpectedDenial);
            }
        } else if has_nsec {
            match nsec_chain(zone) {
                Ok(expected) => Self::compare_chain(
                    zone,
                    RecordType::NSEC,
                    expected.into_iter().map(|(o, r)| (o, RData::Nsec(r))),
                    report,
                ),
                Err(e) => report.add(
                    &apex,
                    RecordType::NSEC,
                    FindingKind::DenialMismatch(e.to_string()),
                ),
            }
        } else {
            report.add(&apex, RecordType::NSEC, FindingKind::NoDenialChain);
        }
    }

    fn compare_chain<I>(zone: &Zone, rtype: RecordType, expected: I, report: &mut VerificationReport)
    where
        I: Iterator<Item = (Name, RData)>,
    {
        let mut actual: BTreeMap<&Name, &RRset> = zone
            .canonical_order()
            .filter(|set| set.rtype == rtype)
            .map(|set| (&set.name, set))
            .collect();

        for (owner, want) in expected {
            let Some(set) = actual.remove(&owner) else {
                report.add(&owner, rtype, FindingKind::MissingDenial);
                continue;
            };
            if set.len() != 1 {
                report.add(
                    &owner,
                    rtype,
                    FindingKind::DenialMismatch(format!("{} records at one owner", set.len())),
                );
                continue;
            }
            if let Some(have) = set.first() {
                if *have != want {
                    report.add(
                        &owner,
                        rtype,
                        FindingKind::DenialMismatch(format!("have {}, expected {}", have, want)),
                    );
                }
            }
        }

        for (owner, _) in actual {
            report.add(owner, rtype, FindingKind::UnexpectedDenial);
        }
    }

    fn check_zonemd(&self, zone: &Zone, report: &mut VerificationReport) {
        let apex = zone.origin();
        let Some(set) = zone.get(apex, RecordType::ZONEMD) else {
            return;
        };

        let mut supported = false;
        let mut matched = false;
        for record in set.rdata().filter_map(RData::as_zonemd) {
            let Some(hash) = ZonemdHash::from_u8(record.hash_algorithm) else {
                continue;
            };
            if record.scheme != super::constants::ZONEMD_SCHEME_SIMPLE {
                continue;
            }
            supported = true;
            match ZoneDigest::compute(zone, hash) {
                Ok(digest) if digest.matches(record) => matched = true,
                Ok(_) => {}
                Err(e) => debug!("ZONEMD computation failed: {}", e),
            }
        }

        if !supported {
            let (scheme, hash_algorithm) = set
                .rdata()
                .filter_map(RData::as_zonemd)
                .map(|r| (r.scheme, r.hash_algorithm))
                .next()
                .unwrap_or((0, 0));
            report.add(
                apex,
                RecordType::ZONEMD,
                FindingKind::ZonemdUnsupported {
                    scheme,
                    hash_algorithm,
                },
            );
        } else if !matched {
            report.add(apex, RecordType::ZONEMD, FindingKind::ZonemdMismatch);
        }
    }
}
