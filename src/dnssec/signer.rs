//! Zone signing.
//!
//! The signer strips DNSSEC material left by an earlier run, rebuilds the
//! apex DNSKEY RRset, adds the denial of existence chain and then signs every
//! authoritative RRset through the HSM session. Signing requests run
//! concurrently, bounded by the context's worker count, and their results are
//! merged back by RRset index so the output never depends on completion
//! order.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use super::canonical::rrsig_signed_data;
use super::constants::ZONEMD_SCHEME_SIMPLE;
use super::context::SigningContext;
use super::digest::ZonemdHash;
use super::denial::DenialChainBuilder;
use super::zonemd::ZoneDigest;
use crate::dns::{Name, RData, RRset, RecordType, Rrsig};
use crate::error::{Error, Result};
use crate::hsm::{KeyHandle, KeyRole, Session};
use crate::zone::Zone;

/// The key pair a zone is signed with
#[derive(Debug, Clone)]
pub struct SigningKeys {
    pub zsk: KeyHandle,
    pub ksk: KeyHandle,
}

/// One signature to produce
struct SignJob {
    owner: Name,
    rtype: RecordType,
    key: KeyHandle,
    rrsig: Rrsig,
    data: Vec<u8>,
}

/// Signs zones with keys held by one HSM session
pub struct Signer {
    session: Session,
    keys: SigningKeys,
}

impl Signer {
    pub fn new(session: Session, keys: SigningKeys) -> Self {
        Self { session, keys }
    }

    /// Check that the context and keys can produce a valid zone. Runs
    /// without touching the HSM.
    pub fn check(context: &SigningContext, keys: &SigningKeys) -> Result<()> {
        context.validate()?;
        for (key, role) in [(&keys.zsk, KeyRole::Zsk), (&keys.ksk, KeyRole::Ksk)] {
            if key.role != role {
                return Err(Error::KeyProvision(format!(
                    "key {} is a {}, expected a {}",
                    key.label, key.role, role
                )));
            }
            if key.algorithm != context.algorithm {
                return Err(Error::Config(format!(
                    "key {} uses {}, but the zone is signed with {}",
                    key.label, key.algorithm, context.algorithm
                )));
            }
        }
        Ok(())
    }

    /// Sign `zone`, returning the signed zone. On any failure nothing is
    /// returned; the caller never sees a partially signed zone.
    pub async fn sign(&self, mut zone: Zone, context: &SigningContext) -> Result<Zone> {
        Self::check(context, &self.keys)?;

        let (soa_ttl, serial) = match (zone.soa_rrset(), zone.soa()) {
            (Some(set), Some(soa)) => (set.ttl, soa.serial),
            _ => return Err(Error::Parse(crate::zone::ZoneError::MissingSOA)),
        };
        let origin = zone.origin().clone();

        // A ZONEMD from an earlier run goes stale once the zone is signed
        let zonemd = match (context.zonemd, zone.remove_rrset(&origin, RecordType::ZONEMD)) {
            (Some(hash), _) => Some(hash),
            (None, Some(old)) => Self::reusable_zonemd(&old),
            (None, None) => None,
        };

        let removed = zone.remove_types(|t| t.is_dnssec_generated());
        if removed > 0 {
            debug!("Removed {} RRsets of earlier DNSSEC material", removed);
        }

        self.rebuild_dnskeys(&mut zone, context, soa_ttl);

        if let Some(hash) = zonemd {
            let mut set = RRset::new(origin.clone(), RecordType::ZONEMD, zone.class(), soa_ttl);
            set.insert(RData::Zonemd(ZoneDigest::placeholder(serial, hash)));
            zone.insert_rrset(set);
        }

        let denial = DenialChainBuilder::new(&context.denial)
            .build(&mut zone)
            .map_err(|e| Error::ChainBuild(e.to_string()))?;

        let jobs = self.jobs(&zone, context, |set| {
            !(zonemd.is_some() && set.rtype == RecordType::ZONEMD && set.name == origin)
        })?;
        let signed = self.run(jobs, context.workers).await?;
        let signatures = signed.len();
        merge_signatures(&mut zone, signed);

        if let Some(hash) = zonemd {
            let digest = ZoneDigest::compute(&zone, hash)?;
            let mut set = RRset::new(origin.clone(), RecordType::ZONEMD, zone.class(), soa_ttl);
            set.insert(RData::Zonemd(digest.to_zonemd()));
            zone.insert_rrset(set);

            let jobs = self.jobs(&zone, context, |set| {
                set.rtype == RecordType::ZONEMD && set.name == origin
            })?;
            let signed = self.run(jobs, context.workers).await?;
            merge_signatures(&mut zone, signed);
            info!("Added ZONEMD {} digest for {}", hash, origin);
        }

        info!(
            "Signed {} with {} signatures and {} denial records",
            origin, signatures, denial
        );
        Ok(zone)
    }

    /// Hash to recompute an input ZONEMD with, when the zone carried one
    /// and no hash was requested. Unsupported records are dropped.
    fn reusable_zonemd(old: &RRset) -> Option<ZonemdHash> {
        let hash = old
            .rdata()
            .filter_map(RData::as_zonemd)
            .filter(|record| record.scheme == ZONEMD_SCHEME_SIMPLE)
            .find_map(|record| ZonemdHash::from_u8(record.hash_algorithm));
        match hash {
            Some(hash) => info!("Recomputing the existing {} ZONEMD of {}", hash, old.name),
            None => warn!(
                "Dropping the ZONEMD of {}: no record uses a supported scheme and hash",
                old.name
            ),
        }
        hash
    }

    fn rebuild_dnskeys(&self, zone: &mut Zone, context: &SigningContext, soa_ttl: u32) {
        let origin = zone.origin().clone();
        let ttl = context.dnskey_ttl.unwrap_or(soa_ttl);

        let mut set = RRset::new(origin.clone(), RecordType::DNSKEY, zone.class(), ttl);
        if let Some(existing) = zone.remove_rrset(&origin, RecordType::DNSKEY) {
            for rdata in existing.rdata() {
                set.insert(rdata.clone());
            }
        }
        set.insert(RData::Dnskey(self.keys.zsk.dnskey()));
        set.insert(RData::Dnskey(self.keys.ksk.dnskey()));
        debug!("DNSKEY RRset at {} holds {} keys", origin, set.len());
        zone.insert_rrset(set);
    }

    fn jobs<F>(&self, zone: &Zone, context: &SigningContext, include: F) -> Result<Vec<SignJob>>
    where
        F: Fn(&RRset) -> bool,
    {
        let mut jobs = Vec::new();
        for rrset in zone.authoritative_rrsets() {
            if rrset.rtype == RecordType::RRSIG || !include(rrset) {
                continue;
            }

            let keys: Vec<&KeyHandle> = if rrset.rtype == RecordType::DNSKEY && rrset.name == *zone.origin() {
                if context.sign_dnskey_with_zsk {
                    vec![&self.keys.ksk, &self.keys.zsk]
                } else {
                    vec![&self.keys.ksk]
                }
            } else {
                vec![&self.keys.zsk]
            };

            for key in keys {
                let rrsig = Rrsig {
                    type_covered: rrset.rtype,
                    algorithm: key.algorithm.to_u8(),
                    labels: rrset.name.rrsig_labels(),
                    original_ttl: rrset.ttl,
                    expiration: context.expiration,
                    inception: context.inception,
                    key_tag: key.key_tag,
                    signer_name: zone.origin().clone(),
                    signature: Vec::new(),
                };
                let data = rrsig_signed_data(&rrsig, rrset).map_err(|e| Error::Signing {
                    owner: rrset.name.to_string(),
                    rtype: rrset.rtype.to_string(),
                    reason: e.to_string(),
                })?;
                jobs.push(SignJob {
                    owner: rrset.name.clone(),
                    rtype: rrset.rtype,
                    key: key.clone(),
                    rrsig,
                    data,
                });
            }
        }
        Ok(jobs)
    }

    /// Sign every job with at most `workers` requests in flight. Results come
    /// back in job order.
    async fn run(&self, jobs: Vec<SignJob>, workers: usize) -> Result<Vec<(Name, u32, Rrsig)>> {
        let total = jobs.len();
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        let mut tasks = JoinSet::new();

        for (index, job) in jobs.into_iter().enumerate() {
            let permits = permits.clone();
            let session = self.session.clone();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => session.sign(&job.key, job.data).await,
                    Err(e) => Err(crate::hsm::KeyStoreError::Signing(e.to_string())),
                };
                (index, job.owner, job.rtype, job.rrsig, result)
            });
        }

        let mut slots: Vec<Option<(Name, u32, Rrsig)>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, owner, rtype, mut rrsig, result) = joined.map_err(|e| Error::Signing {
                owner: String::new(),
                rtype: String::new(),
                reason: e.to_string(),
            })?;

            match result {
                Ok(signature) => {
                    trace!("Signed {} {} with key {}", owner, rtype, rrsig.key_tag);
                    rrsig.signature = signature;
                    let ttl = rrsig.original_ttl;
                    slots[index] = Some((owner, ttl, rrsig));
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(Error::Signing {
                        owner: owner.to_string(),
                        rtype: rtype.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

/// Add signatures to the RRSIG RRsets of their owners. An RRSIG RRset
/// carries the lowest TTL of the RRsets it covers.
fn merge_signatures(zone: &mut Zone, signed: Vec<(Name, u32, Rrsig)>) {
    let class = zone.class();
    let mut by_owner: BTreeMap<Name, Vec<(u32, Rrsig)>> = BTreeMap::new();
    for (owner, ttl, rrsig) in signed {
        by_owner.entry(owner).or_default().push((ttl, rrsig));
    }

    for (owner, sigs) in by_owner {
        let mut set = zone
            .remove_rrset(&owner, RecordType::RRSIG)
            .unwrap_or_else(|| RRset::new(owner.clone(), RecordType::RRSIG, class, u32::MAX));
        for (ttl, rrsig) in sigs {
            set.ttl = set.ttl.min(ttl);
            set.insert(RData::Rrsig(rrsig));
        }
        zone.insert_rrset(set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnssec::{DenialMode, DnsSecAlgorithm, Nsec3Params, ZonemdHash};
    use crate::hsm::{KeyStore, SoftToken};
    use crate::zone::StrSource;

    const ZONE: &str = "$ORIGIN example.\n\
        $TTL 3600\n\
        @ SOA ns1 hostmaster 1 7200 3600 1209600 300\n\
        @ NS ns1\n\
        ns1 A 192.0.2.1\n\
        www A 192.0.2.2\n\
        sub NS ns.sub\n\
        ns.sub A 192.0.2.3\n";

    async fn signer(token: SoftToken) -> Signer {
        let store = KeyStore::new(Arc::new(token));
        let session = store.open_session().await.unwrap();
        let zsk = session
            .find_or_create_key(KeyRole::Zsk, DnsSecAlgorithm::EcdsaP256Sha256, "zsk-test")
            .await
            .unwrap();
        let ksk = session
            .find_or_create_key(KeyRole::Ksk, DnsSecAlgorithm::EcdsaP256Sha256, "ksk-test")
            .await
            .unwrap();
        Signer::new(session, SigningKeys { zsk, ksk })
    }

    fn context(denial: DenialMode) -> SigningContext {
        SigningContext::new(
            DnsSecAlgorithm::EcdsaP256Sha256,
            denial,
            1_700_000_000,
            1_702_592_000,
        )
    }

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    fn covered(zone: &Zone, owner: &str) -> Vec<RecordType> {
        zone.get(&name(owner), RecordType::RRSIG)
            .map(|set| {
                set.rdata()
                    .filter_map(RData::as_rrsig)
                    .map(|sig| sig.type_covered)
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_sign_covers_authoritative_rrsets() {
        let signer = signer(SoftToken::new()).await;
        let zone = Zone::load(&StrSource::new(ZONE)).unwrap();
        let signed = signer.sign(zone, &context(DenialMode::Nsec)).await.unwrap();

        let mut apex = covered(&signed, "example.");
        apex.sort();
        assert_eq!(
            apex,
            vec![
                RecordType::NS,
                RecordType::SOA,
                RecordType::NSEC,
                RecordType::DNSKEY
            ]
        );
        assert_eq!(covered(&signed, "www.example."), vec![RecordType::A, RecordType::NSEC]);
        // delegation NS and glue stay unsigned
        assert_eq!(covered(&signed, "sub.example."), vec![RecordType::NSEC]);
        assert!(covered(&signed, "ns.sub.example.").is_empty());
    }

    #[tokio::test]
    async fn test_dnskey_dual_signing() {
        let signer = signer(SoftToken::new()).await;
        let zone = Zone::load(&StrSource::new(ZONE)).unwrap();
        let mut ctx = context(DenialMode::Nsec);
        ctx.sign_dnskey_with_zsk = true;
        ctx.dnskey_ttl = Some(600);
        let signed = signer.sign(zone, &ctx).await.unwrap();

        let dnskey = signed.get(&name("example."), RecordType::DNSKEY).unwrap();
        assert_eq!(dnskey.len(), 2);
        assert_eq!(dnskey.ttl, 600);

        let tags: Vec<u16> = signed
            .get(&name("example."), RecordType::RRSIG)
            .unwrap()
            .rdata()
            .filter_map(RData::as_rrsig)
            .filter(|sig| sig.type_covered == RecordType::DNSKEY)
            .map(|sig| sig.key_tag)
            .collect();
        assert_eq!(tags.len(), 2);
        assert!(tags.contains(&signer.keys.zsk.key_tag));
        assert!(tags.contains(&signer.keys.ksk.key_tag));
    }

    #[tokio::test]
    async fn test_resigning_replaces_old_material() {
        let signer = signer(SoftToken::new()).await;
        let zone = Zone::load(&StrSource::new(ZONE)).unwrap();
        let ctx = context(DenialMode::Nsec3(Nsec3Params::default()));
        let once = signer.sign(zone, &ctx).await.unwrap();
        let count = once.record_count();
        let twice = signer.sign(once, &ctx).await.unwrap();
        assert_eq!(twice.record_count(), count);
        assert!(twice.get(&name("example."), RecordType::NSEC3PARAM).is_some());
    }

    #[tokio::test]
    async fn test_zonemd_is_final_and_signed() {
        let signer = signer(SoftToken::new()).await;
        let zone = Zone::load(&StrSource::new(ZONE)).unwrap();
        let mut ctx = context(DenialMode::Nsec);
        ctx.zonemd = Some(ZonemdHash::Sha384);
        let signed = signer.sign(zone, &ctx).await.unwrap();

        let record = signed
            .get(&name("example."), RecordType::ZONEMD)
            .and_then(RRset::first)
            .and_then(RData::as_zonemd)
            .unwrap();
        let digest = ZoneDigest::compute(&signed, ZonemdHash::Sha384).unwrap();
        assert!(digest.matches(record));
        assert!(covered(&signed, "example.").contains(&RecordType::ZONEMD));
    }

    fn with_zonemd(mut zone: Zone, hash_algorithm: u8) -> Zone {
        let mut set = RRset::new(name("example."), RecordType::ZONEMD, zone.class(), 3600);
        set.insert(RData::Zonemd(crate::dns::Zonemd {
            serial: 1,
            scheme: ZONEMD_SCHEME_SIMPLE,
            hash_algorithm,
            digest: vec![0xaa; 48],
        }));
        zone.insert_rrset(set);
        zone
    }

    #[tokio::test]
    async fn test_existing_zonemd_is_recomputed() {
        let signer = signer(SoftToken::new()).await;
        let zone = with_zonemd(Zone::load(&StrSource::new(ZONE)).unwrap(), 1);
        let signed = signer.sign(zone, &context(DenialMode::Nsec)).await.unwrap();

        let set = signed.get(&name("example."), RecordType::ZONEMD).unwrap();
        assert_eq!(set.len(), 1);
        let record = set.first().and_then(RData::as_zonemd).unwrap();
        let digest = ZoneDigest::compute(&signed, ZonemdHash::Sha384).unwrap();
        assert!(digest.matches(record));
        assert!(covered(&signed, "example.").contains(&RecordType::ZONEMD));

        // Signing the result again keeps it current
        let again = signer.sign(signed, &context(DenialMode::Nsec)).await.unwrap();
        let record = again
            .get(&name("example."), RecordType::ZONEMD)
            .and_then(RRset::first)
            .and_then(RData::as_zonemd)
            .unwrap();
        assert!(ZoneDigest::compute(&again, ZonemdHash::Sha384).unwrap().matches(record));
    }

    #[tokio::test]
    async fn test_unsupported_zonemd_is_dropped() {
        let signer = signer(SoftToken::new()).await;
        let zone = with_zonemd(Zone::load(&StrSource::new(ZONE)).unwrap(), 240);
        let signed = signer.sign(zone, &context(DenialMode::Nsec)).await.unwrap();

        assert!(signed.get(&name("example."), RecordType::ZONEMD).is_none());
        assert!(!covered(&signed, "example.").contains(&RecordType::ZONEMD));
    }

    #[tokio::test]
    async fn test_invalid_window_rejected_before_signing() {
        let token = SoftToken::new();
        let signer = signer(token.clone()).await;
        token.set_operational(false);
        token.lose_sessions(usize::MAX);

        let zone = Zone::load(&StrSource::new(ZONE)).unwrap();
        let ctx = SigningContext::new(DnsSecAlgorithm::EcdsaP256Sha256, DenialMode::Nsec, 10, 10);
        let err = signer.sign(zone, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_failure_names_the_rrset() {
        let token = SoftToken::new();
        let signer = signer(token.clone()).await;
        token.set_operational(false);
        token.lose_sessions(usize::MAX);

        let zone = Zone::load(&StrSource::new(ZONE)).unwrap();
        let err = signer
            .sign(zone, &context(DenialMode::Nsec))
            .await
            .unwrap_err();
        match err {
            Error::Signing { owner, rtype, .. } => {
                assert!(!owner.is_empty());
                assert!(!rtype.is_empty());
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
