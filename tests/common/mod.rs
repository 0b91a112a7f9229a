//! Shared helpers for the integration tests

#![allow(dead_code)] // Not every test file uses every helper

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dns_tools::config::{Backend, DenialKind, ToolConfig};
use dns_tools::dns::{Name, RData, RecordType};
use dns_tools::dnssec::DnsSecAlgorithm;
use dns_tools::hsm::{KeyStore, SoftToken};
use dns_tools::tools;
use dns_tools::zone::{StrSource, Zone};

/// Fixed signing time so validity windows are predictable
pub const NOW: i64 = 1_700_000_000;

/// A small zone with a secure and an insecure delegation, glue, a wildcard
/// and an empty non-terminal.
pub const EXAMPLE_ZONE: &str = r#"
$ORIGIN example.com.
$TTL 3600

@       IN  SOA ns1.example.com. admin.example.com. (
                2024010101 ; serial
                3600       ; refresh
                900        ; retry
                604800     ; expire
                300 )      ; minimum

@       IN  NS  ns1
@       IN  NS  ns2.example.com.
@       IN  MX  10 mail

ns1     IN  A   192.0.2.1
ns2     IN  A   192.0.2.2
mail    IN  A   192.0.2.3
        IN  AAAA 2001:db8::3
www     IN  CNAME mail
*.apps  IN  TXT "wildcard" "record"
a.b.deep IN A 192.0.2.4

secure  IN  NS  ns.secure
        IN  DS  12345 13 2 0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF
ns.secure IN A  192.0.2.5
insecure IN NS  ns.elsewhere.net.
"#;

/// The minimal zone: SOA and one A record
pub const MINIMAL_ZONE: &str = "$ORIGIN example.\n\
    $TTL 3600\n\
    @ IN SOA ns.example. admin.example. 1 7200 3600 1209600 300\n\
    www IN A 192.0.2.1\n";

pub fn name(s: &str) -> Name {
    s.parse().unwrap()
}

pub fn load(text: &str) -> Zone {
    Zone::load(&StrSource::new(text)).unwrap()
}

pub fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(NOW, 0).unwrap()
}

pub fn soft_config(algorithm: DnsSecAlgorithm, denial: DenialKind) -> ToolConfig {
    ToolConfig {
        backend: Backend::Soft,
        algorithm,
        denial_mode: denial,
        workers: 4,
        ..Default::default()
    }
}

pub fn soft_store() -> (SoftToken, KeyStore) {
    let token = SoftToken::new();
    let store = KeyStore::new(Arc::new(token.clone()));
    (token, store)
}

/// Sign `text` with fresh in-memory keys at [`NOW`]
pub async fn sign_text(text: &str, config: &ToolConfig) -> Zone {
    let (_, store) = soft_store();
    tools::sign_zone(load(text), config, &store, now())
        .await
        .unwrap()
}

/// Types covered by the RRSIGs at `owner`
pub fn covered_types(zone: &Zone, owner: &str) -> Vec<RecordType> {
    zone.get(&name(owner), RecordType::RRSIG)
        .map(|set| {
            set.rdata()
                .filter_map(RData::as_rrsig)
                .map(|sig| sig.type_covered)
                .collect()
        })
        .unwrap_or_default()
}
