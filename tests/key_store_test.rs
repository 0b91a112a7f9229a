mod common;

use std::fs;
use std::path::Path;

use common::*;
use dns_tools::config::{Backend, DenialKind, ToolConfig};
use dns_tools::dns::Dnskey;
use dns_tools::dnssec::{DnsSecAlgorithm, zone_keys};
use dns_tools::hsm::KeyRole;
use dns_tools::{Error, tools};

fn config(dir: &Path) -> ToolConfig {
    ToolConfig {
        backend: Backend::Soft,
        soft_token_dir: Some(dir.join("token")),
        algorithm: DnsSecAlgorithm::EcdsaP256Sha256,
        denial_mode: DenialKind::Nsec,
        ..Default::default()
    }
}

async fn signed_keys(dir: &Path, config: &ToolConfig) -> Vec<Dnskey> {
    let zone_in = dir.join("example.zone");
    if !zone_in.exists() {
        fs::write(&zone_in, EXAMPLE_ZONE).unwrap();
    }
    let signed = tools::sign(&zone_in, &dir.join("example.zone.signed"), config)
        .await
        .unwrap();
    zone_keys(&signed)
}

fn tag_of(keys: &[Dnskey], sep: bool) -> u16 {
    keys.iter().find(|k| k.is_sep() == sep).unwrap().key_tag()
}

#[tokio::test]
async fn test_keys_persist_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let first = signed_keys(dir.path(), &config).await;
    let second = signed_keys(dir.path(), &config).await;
    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_reset_zsk_gives_new_tag() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let before = signed_keys(dir.path(), &config).await;
    let destroyed = tools::reset_keys("zsk-", &config).await.unwrap();
    assert_eq!(destroyed, 1);

    let after = signed_keys(dir.path(), &config).await;
    assert_ne!(tag_of(&before, false), tag_of(&after, false));
    // The KSK was left alone
    assert_eq!(tag_of(&before, true), tag_of(&after, true));
}

#[tokio::test]
async fn test_reset_everything() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    signed_keys(dir.path(), &config).await;

    assert_eq!(tools::reset_keys("", &config).await.unwrap(), 2);
    assert_eq!(tools::reset_keys("", &config).await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_keys_without_creation() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.create_keys = false;

    let zone_in = dir.path().join("example.zone");
    fs::write(&zone_in, MINIMAL_ZONE).unwrap();
    let result = tools::sign(&zone_in, &dir.path().join("out.zone"), &config).await;
    assert!(matches!(result, Err(Error::KeyProvision(_))));
    assert!(!dir.path().join("out.zone").exists());
}

#[tokio::test]
async fn test_listed_roles_match_flags() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    signed_keys(dir.path(), &config).await;

    let session = tools::key_store(&config)
        .unwrap()
        .open_session()
        .await
        .unwrap();
    let ksks = session.list_keys(Some(KeyRole::Ksk)).await.unwrap();
    assert_eq!(ksks.len(), 1);
    assert_eq!(ksks[0].label, config.ksk_label);
    assert!(ksks[0].dnskey().is_sep());

    let all = session.list_keys(None).await.unwrap();
    assert_eq!(all.len(), 2);
}
