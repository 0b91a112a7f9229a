//! Tool operations behind the command line: sign, verify, digest and key
//! reset. Each takes its configuration explicitly.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::{Backend, ToolConfig};
use crate::dns::{Dnskey, Name, RData, RRset, RecordType, ResourceRecord};
use crate::dnssec::{DigestType, Signer, SigningKeys, VerificationReport, Verifier, ZoneDigest, ZonemdHash, zone_keys};
use crate::error::{Error, Result};
use crate::hsm::{KeyRole, KeyStore, SoftToken, Token};
use crate::zone::{AtomicFileSink, FileSource, Zone, write_zone};

/// Fail early when an input file is missing or unreadable
pub fn check_readable(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(Error::Io(format!("{}: no such file", path.display())));
    }
    File::open(path).map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

/// Load a zone file, using the configured origin when the file has none
pub fn load_zone(path: &Path, config: &ToolConfig) -> Result<Zone> {
    check_readable(path)?;
    let origin = config
        .origin
        .as_deref()
        .map(|o| Name::parse(o, None).map_err(|e| Error::Config(format!("origin {}: {}", o, e))))
        .transpose()?;
    Ok(Zone::load_with_origin(&FileSource::new(path), origin)?)
}

fn save_zone(zone: &Zone, path: &Path) -> Result<()> {
    let mut sink = AtomicFileSink::new(path);
    write_zone(zone, &mut sink)?;
    info!("Wrote {} records to {}", zone.record_count(), path.display());
    Ok(())
}

/// The token the configuration points at
pub fn open_token(config: &ToolConfig) -> Result<Arc<dyn Token>> {
    match config.backend {
        Backend::Soft => {
            let token = match &config.soft_token_dir {
                Some(dir) => SoftToken::open_dir(dir).map_err(|e| Error::HsmConnection(e.to_string()))?,
                None => {
                    warn!("Soft token without a directory; keys will not outlive this run");
                    SoftToken::new()
                }
            };
            Ok(Arc::new(token))
        }
        Backend::Pkcs11 => open_pkcs11(config),
    }
}

#[cfg(feature = "pkcs11")]
fn open_pkcs11(config: &ToolConfig) -> Result<Arc<dyn Token>> {
    let library = config
        .hsm_library_path
        .as_deref()
        .ok_or_else(|| Error::Config("hsm_library_path is not set".to_string()))?;
    let pin = config.pin.as_ref().map(|p| p.expose()).unwrap_or_default();
    let token = crate::hsm::Pkcs11Token::open(library, config.slot, pin)
        .map_err(|e| Error::HsmConnection(e.to_string()))?;
    Ok(Arc::new(token))
}

#[cfg(not(feature = "pkcs11"))]
fn open_pkcs11(_config: &ToolConfig) -> Result<Arc<dyn Token>> {
    Err(Error::Config(
        "built without PKCS#11 support; enable the pkcs11 feature or use the soft backend"
            .to_string(),
    ))
}

/// A key store over the configured token
pub fn key_store(config: &ToolConfig) -> Result<KeyStore> {
    Ok(KeyStore::new(open_token(config)?)
        .with_timeout(config.hsm_timeout())
        .with_create_keys(config.create_keys))
}

/// Sign the zone at `zone_in` and write it to `zone_out`
pub async fn sign(zone_in: &Path, zone_out: &Path, config: &ToolConfig) -> Result<Zone> {
    let zone = load_zone(zone_in, config)?;
    let store = key_store(config)?;
    let signed = sign_zone(zone, config, &store, Utc::now()).await?;
    save_zone(&signed, zone_out)?;
    Ok(signed)
}

/// Sign an already loaded zone with keys from `store`
pub async fn sign_zone(
    zone: Zone,
    config: &ToolConfig,
    store: &KeyStore,
    now: DateTime<Utc>,
) -> Result<Zone> {
    // Parameters are checked before the HSM is touched
    let context = config.signing_context(now)?;
    context.validate()?;

    let session = store.open_session().await?;
    let zsk = session
        .find_or_create_key(KeyRole::Zsk, config.algorithm, &config.zsk_label)
        .await?;
    let ksk = session
        .find_or_create_key(KeyRole::Ksk, config.algorithm, &config.ksk_label)
        .await?;
    info!("Signing {} with {} and {}", zone.origin(), zsk, ksk);

    let ksk_dnskey = ksk.dnskey();
    let signed = Signer::new(session, SigningKeys { zsk, ksk })
        .sign(zone, &context)
        .await?;

    // The parent needs this to chain trust to the KSK
    let ds = DigestType::Sha256.ds_for(signed.origin(), &ksk_dnskey);
    let ttl = signed.soa_rrset().map(|set| set.ttl).unwrap_or_default();
    info!(
        "DS for the parent zone: {}",
        ResourceRecord::new(signed.origin().clone(), ttl, signed.class(), RecordType::DS, RData::Ds(ds))
    );
    Ok(signed)
}

/// Verify the zone at `zone_in`. Trusted keys are the zone's own DNSKEYs,
/// or the configured HSM keys when the zone publishes none.
pub async fn verify(zone_in: &Path, config: &ToolConfig) -> Result<VerificationReport> {
    let zone = load_zone(zone_in, config)?;

    let mut trusted = zone_keys(&zone);
    if trusted.is_empty() {
        info!("{} publishes no DNSKEY, trusting the HSM keys", zone.origin());
        trusted = hsm_keys(config).await?;
    }

    let now = u32::try_from(Utc::now().timestamp())
        .map_err(|_| Error::Config("system clock out of range".to_string()))?;
    let report = Verifier::new(now)
        .with_clock_skew(config.clock_skew_secs)
        .verify(&zone, &trusted);
    for finding in &report.findings {
        warn!("{}", finding);
    }
    Ok(report)
}

/// Public halves of the configured ZSK and KSK
async fn hsm_keys(config: &ToolConfig) -> Result<Vec<Dnskey>> {
    let session = key_store(config)?.open_session().await?;
    Ok(session
        .list_keys(None)
        .await?
        .into_iter()
        .filter(|key| key.label == config.zsk_label || key.label == config.ksk_label)
        .map(|key| key.dnskey())
        .collect())
}

/// Compute the ZONEMD digest of `zone_in`. With `zone_out`, the zone is
/// written there with its ZONEMD record replaced by the new one.
pub fn digest(zone_in: &Path, zone_out: Option<&Path>, config: &ToolConfig) -> Result<ZoneDigest> {
    let mut zone = load_zone(zone_in, config)?;
    let hash = config.zonemd.hash().unwrap_or_default();
    let digest = add_zonemd(&mut zone, hash)?;

    if let Some(out) = zone_out {
        if zone.get(zone.origin(), RecordType::RRSIG).is_some() {
            warn!("{} is signed; the new ZONEMD record is not", zone.origin());
        }
        save_zone(&zone, out)?;
    }
    Ok(digest)
}

/// Replace the apex ZONEMD RRset with a freshly computed digest
pub fn add_zonemd(zone: &mut Zone, hash: ZonemdHash) -> Result<ZoneDigest> {
    let origin = zone.origin().clone();
    let ttl = zone
        .soa_rrset()
        .map(|set| set.ttl)
        .ok_or(Error::Parse(crate::zone::ZoneError::MissingSOA))?;

    let digest = ZoneDigest::compute(zone, hash)?;
    let mut set = RRset::new(origin.clone(), RecordType::ZONEMD, zone.class(), ttl);
    set.insert(RData::Zonemd(digest.to_zonemd()));
    zone.insert_rrset(set);

    // Signatures over the old record no longer apply
    if let Some(sigs) = zone.get_mut(&origin, RecordType::RRSIG) {
        sigs.retain(|rdata| !matches!(rdata, RData::Rrsig(sig) if sig.type_covered == RecordType::ZONEMD));
        if sigs.is_empty() {
            zone.remove_rrset(&origin, RecordType::RRSIG);
        }
    }

    info!("{} ZONEMD {} {}", origin, hash, hex::encode(&digest.digest));
    Ok(digest)
}

/// Destroy every key whose label starts with `label_prefix`. Callers obtain
/// confirmation first.
pub async fn reset_keys(label_prefix: &str, config: &ToolConfig) -> Result<usize> {
    let session = key_store(config)?.open_session().await?;
    let destroyed = session.reset_keys(label_prefix).await?;
    info!("Destroyed {} keys labelled {}*", destroyed, label_prefix);
    Ok(destroyed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DenialKind;

    const ZONE: &str = "$ORIGIN example.\n\
        $TTL 3600\n\
        @ SOA ns1 hostmaster 1 7200 3600 1209600 300\n\
        @ NS ns1\n\
        ns1 A 192.0.2.1\n";

    fn config(dir: &Path) -> ToolConfig {
        ToolConfig {
            backend: Backend::Soft,
            soft_token_dir: Some(dir.join("keys")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sign_then_verify_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("example.zone");
        let output = dir.path().join("example.signed");
        std::fs::write(&input, ZONE).unwrap();

        let config = ToolConfig {
            denial_mode: DenialKind::Nsec3,
            ..config(dir.path())
        };
        sign(&input, &output, &config).await.unwrap();

        let report = verify(&output, &config).await.unwrap();
        assert!(report.is_ok(), "{:?}", report.findings);
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = sign(
            &dir.path().join("absent.zone"),
            &dir.path().join("out.zone"),
            &config(dir.path()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!dir.path().join("out.zone").exists());
    }

    #[test]
    fn test_digest_writes_zonemd() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("example.zone");
        let output = dir.path().join("example.digest");
        std::fs::write(&input, ZONE).unwrap();

        let config = config(dir.path());
        let first = digest(&input, Some(&output), &config).unwrap();
        // digesting the output again ignores the ZONEMD it now carries
        let second = digest(&output, None, &config).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.hash, ZonemdHash::Sha384);
    }

    #[test]
    fn test_pkcs11_backend_needs_library() {
        let config = ToolConfig::default();
        assert!(matches!(open_token(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_digest_and_verify_without_hsm() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("example.zone");
        let signed = dir.path().join("example.signed");
        std::fs::write(&input, ZONE).unwrap();
        sign(&input, &signed, &config(dir.path())).await.unwrap();

        // Neither needs a token: the zone brings its own keys
        let defaults = ToolConfig::default();
        let report = verify(&signed, &defaults).await.unwrap();
        assert!(report.is_ok(), "{:?}", report.findings);
        let digest = digest(&input, None, &defaults).unwrap();
        assert_eq!(digest.serial, 1);

        // An unsigned zone has no keys of its own, so the token is needed
        let err = verify(&input, &defaults).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
