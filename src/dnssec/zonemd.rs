//! Whole-zone message digest (RFC 8976), SIMPLE scheme.

use ring::digest;
use tracing::debug;

use super::canonical::write_canonical_rr;
use super::constants::ZONEMD_SCHEME_SIMPLE;
use super::digest::ZonemdHash;
use super::errors::{DnsSecError, Result};
use crate::dns::{RData, RecordType, Zonemd};
use crate::zone::Zone;

/// A computed zone digest, ready to become a ZONEMD record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneDigest {
    pub serial: u32,
    pub scheme: u8,
    pub hash: ZonemdHash,
    pub digest: Vec<u8>,
}

impl ZoneDigest {
    /// Digest every record of `zone` in canonical order and canonical wire
    /// form, leaving out the apex ZONEMD RRset and the signatures over it.
    pub fn compute(zone: &Zone, hash: ZonemdHash) -> Result<Self> {
        let serial = zone.soa().ok_or(DnsSecError::MissingSoa)?.serial;
        let origin = zone.origin();

        let mut ctx = digest::Context::new(hash.ring_algorithm());
        let mut buf = Vec::with_capacity(512);
        let mut records = 0usize;

        for rrset in zone.canonical_order() {
            let at_apex = rrset.name == *origin;
            if at_apex && rrset.rtype == RecordType::ZONEMD {
                continue;
            }

            for (wire, rdata) in rrset.canonical_rdata().zip(rrset.rdata()) {
                if at_apex
                    && rrset.rtype == RecordType::RRSIG
                    && matches!(rdata, RData::Rrsig(sig) if sig.type_covered == RecordType::ZONEMD)
                {
                    continue;
                }
                buf.clear();
                write_canonical_rr(&mut buf, &rrset.name, rrset.rtype, rrset.class, rrset.ttl, wire)?;
                ctx.update(&buf);
                records += 1;
            }
        }

        let digest = ctx.finish().as_ref().to_vec();
        debug!(
            "ZONEMD {} over {} records of {}: {}",
            hash,
            records,
            origin,
            hex::encode(&digest)
        );

        Ok(Self {
            serial,
            scheme: ZONEMD_SCHEME_SIMPLE,
            hash,
            digest,
        })
    }

    /// The ZONEMD RDATA for this digest
    pub fn to_zonemd(&self) -> Zonemd {
        Zonemd {
            serial: self.serial,
            scheme: self.scheme,
            hash_algorithm: self.hash.to_u8(),
            digest: self.digest.clone(),
        }
    }

    /// A ZONEMD of the right shape whose digest is still all zeroes. It
    /// holds the record's place while the rest of the zone is signed.
    pub fn placeholder(serial: u32, hash: ZonemdHash) -> Zonemd {
        Zonemd {
            serial,
            scheme: ZONEMD_SCHEME_SIMPLE,
            hash_algorithm: hash.to_u8(),
            digest: vec![0; hash.digest_len()],
        }
    }

    /// Whether `record` carries this digest
    pub fn matches(&self, record: &Zonemd) -> bool {
        record.serial == self.serial
            && record.scheme == self.scheme
            && record.hash_algorithm == self.hash.to_u8()
            && record.digest == self.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Name, RRset};
    use crate::zone::StrSource;

    const ZONE: &str = "$ORIGIN example.\n\
        $TTL 86400\n\
        @ SOA ns1 admin 2018031900 1800 900 604800 86400\n\
        @ NS ns1\n\
        @ NS ns2\n\
        ns1 3600 A 203.0.113.63\n\
        ns2 3600 AAAA 2001:db8::63\n";

    fn zone() -> Zone {
        Zone::load(&StrSource::new(ZONE)).unwrap()
    }

    #[test]
    fn test_digest_is_deterministic() {
        let a = ZoneDigest::compute(&zone(), ZonemdHash::Sha384).unwrap();
        let b = ZoneDigest::compute(&zone(), ZonemdHash::Sha384).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest.len(), 48);
        assert_eq!(a.serial, 2018031900);

        let sha512 = ZoneDigest::compute(&zone(), ZonemdHash::Sha512).unwrap();
        assert_eq!(sha512.digest.len(), 64);
    }

    #[test]
    /// RFC 8976 appendix A.1
    fn test_known_digest_with_zonemd_present() {
        let mut zone = zone();
        let expected = hex::decode(
            "c68090d90a7aed716bc459f9340e3d7c1370d4d24b7e2fc3a1ddc0b9a87153b9\
             a9713b3c9ae5cc27777f98b8e730044c",
        )
        .unwrap();
        let mut set = RRset::new(
            zone.origin().clone(),
            RecordType::ZONEMD,
            zone.class(),
            86400,
        );
        set.insert(RData::Zonemd(Zonemd {
            serial: 2018031900,
            scheme: 1,
            hash_algorithm: 1,
            digest: expected.clone(),
        }));
        zone.insert_rrset(set);

        let digest = ZoneDigest::compute(&zone, ZonemdHash::Sha384).unwrap();
        assert_eq!(digest.digest, expected);
        let record = zone
            .get(&"example.".parse::<Name>().unwrap(), RecordType::ZONEMD)
            .and_then(RRset::first)
            .and_then(RData::as_zonemd)
            .unwrap();
        assert!(digest.matches(record));
    }

    #[test]
    fn test_digest_tracks_rdata() {
        let before = ZoneDigest::compute(&zone(), ZonemdHash::Sha384).unwrap();
        let changed = Zone::load(&StrSource::new(ZONE.replace("203.0.113.63", "203.0.113.64")))
            .unwrap();
        let after = ZoneDigest::compute(&changed, ZonemdHash::Sha384).unwrap();
        assert_ne!(before.digest, after.digest);
    }

    #[test]
    fn test_placeholder_is_ignored() {
        let plain = ZoneDigest::compute(&zone(), ZonemdHash::Sha384).unwrap();

        let mut zone = zone();
        let mut set = RRset::new(zone.origin().clone(), RecordType::ZONEMD, zone.class(), 86400);
        set.insert(RData::Zonemd(ZoneDigest::placeholder(1, ZonemdHash::Sha384)));
        zone.insert_rrset(set);
        let with_placeholder = ZoneDigest::compute(&zone, ZonemdHash::Sha384).unwrap();

        assert_eq!(plain, with_placeholder);
    }
}
