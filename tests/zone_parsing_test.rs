mod common;

use std::fs;

use common::*;
use dns_tools::config::ToolConfig;
use dns_tools::dns::{RData, RecordType};
use dns_tools::tools;
use dns_tools::zone::{FileSource, MemorySink, StrSource, Zone, ZoneError, write_zone};
use dns_tools::Error;

#[test]
fn test_parse_example_zone() {
    let zone = load(EXAMPLE_ZONE);
    assert_eq!(zone.origin(), &name("example.com."));

    let soa = zone.soa().unwrap();
    assert_eq!(soa.serial, 2024010101);
    assert_eq!(soa.minimum, 300);

    assert_eq!(zone.get(&name("example.com."), RecordType::NS).unwrap().len(), 2);
    assert_eq!(zone.get(&name("mail.example.com."), RecordType::AAAA).unwrap().ttl, 3600);

    let txt = zone
        .get(&name("*.apps.example.com."), RecordType::TXT)
        .and_then(|set| set.first())
        .unwrap();
    assert!(matches!(txt, RData::Txt(parts) if parts.len() == 2));
}

#[test]
fn test_zone_structure() {
    let zone = load(EXAMPLE_ZONE);

    assert_eq!(
        zone.zone_cuts(),
        vec![name("insecure.example.com."), name("secure.example.com.")]
    );
    assert!(zone.is_insecure_delegation(&name("insecure.example.com.")));
    assert!(!zone.is_insecure_delegation(&name("secure.example.com.")));
    assert!(zone.is_occluded(&name("ns.secure.example.com.")));

    let authoritative = zone.authoritative_names();
    assert!(authoritative.contains(&name("secure.example.com.")));
    assert!(!authoritative.contains(&name("ns.secure.example.com.")));

    let ents = zone.empty_non_terminals(authoritative.iter());
    assert!(ents.contains(&name("b.deep.example.com.")));
    assert!(ents.contains(&name("deep.example.com.")));
    assert!(ents.contains(&name("apps.example.com.")));
}

#[test]
fn test_load_from_file_with_include() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hosts.inc"), "host1 IN A 192.0.2.11\nhost2 IN A 192.0.2.12\n").unwrap();
    let path = dir.path().join("example.zone");
    fs::write(
        &path,
        "$ORIGIN example.\n$TTL 600\n\
         @ SOA ns1 hostmaster 7 7200 3600 1209600 300\n\
         @ NS ns1\n\
         ns1 A 192.0.2.1\n\
         $INCLUDE hosts.inc\n",
    )
    .unwrap();

    let zone = Zone::load(&FileSource::new(&path)).unwrap();
    assert!(zone.get(&name("host2.example."), RecordType::A).is_some());
    assert_eq!(zone.get(&name("host1.example."), RecordType::A).unwrap().ttl, 600);
}

#[test]
fn test_origin_from_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no-origin.zone");
    fs::write(
        &path,
        "@ 300 IN SOA ns1 hostmaster 1 7200 3600 1209600 300\nwww 300 IN A 192.0.2.1\n",
    )
    .unwrap();

    let no_origin = tools::load_zone(&path, &ToolConfig::default());
    assert!(matches!(no_origin, Err(Error::Parse(_))));

    let config = ToolConfig {
        origin: Some("example.net.".to_string()),
        ..Default::default()
    };
    let zone = tools::load_zone(&path, &config).unwrap();
    assert_eq!(zone.origin(), &name("example.net."));
    assert!(zone.get(&name("www.example.net."), RecordType::A).is_some());
}

#[test]
fn test_rejected_zones() {
    let cases = [
        (
            "duplicate SOA",
            "$ORIGIN example.\n\
             @ 300 SOA ns1 hostmaster 1 7200 3600 1209600 300\n\
             @ 300 SOA ns1 hostmaster 2 7200 3600 1209600 300\n",
        ),
        ("missing SOA", "$ORIGIN example.\nwww 300 A 192.0.2.1\n"),
        ("missing origin", "www.example. 300 A 192.0.2.1\n"),
        (
            "divergent TTL",
            "$ORIGIN example.\n\
             @ 300 SOA ns1 hostmaster 1 7200 3600 1209600 300\n\
             www 300 A 192.0.2.1\n\
             www 600 A 192.0.2.2\n",
        ),
        (
            "out of zone",
            "$ORIGIN example.\n\
             @ 300 SOA ns1 hostmaster 1 7200 3600 1209600 300\n\
             www.example.org. 300 A 192.0.2.1\n",
        ),
    ];

    for (what, text) in cases {
        let result = Zone::load(&StrSource::new(text));
        let matched = match (what, &result) {
            ("duplicate SOA", Err(ZoneError::DuplicateSOA)) => true,
            ("missing SOA", Err(ZoneError::MissingSOA)) => true,
            ("missing origin", Err(ZoneError::MissingOrigin(_))) => true,
            ("divergent TTL", Err(ZoneError::TtlMismatch { first, second, .. })) => {
                *first == 300 && *second == 600
            }
            ("out of zone", Err(ZoneError::OutOfZone(..))) => true,
            _ => false,
        };
        assert!(matched, "{}: {:?}", what, result.map(|z| z.record_count()));
    }
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = tools::load_zone(&dir.path().join("absent.zone"), &ToolConfig::default());
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_written_zone_is_canonical() {
    let zone = load(EXAMPLE_ZONE);
    let mut sink = MemorySink::default();
    write_zone(&zone, &mut sink).unwrap();
    let text = sink.contents.unwrap();

    let owners: Vec<&str> = text
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    assert_eq!(owners.first(), Some(&"example.com."));
    // Canonical order puts the wildcard right after its parent
    let apps = owners.iter().position(|o| *o == "*.apps.example.com.").unwrap();
    let deep = owners.iter().position(|o| *o == "a.b.deep.example.com.").unwrap();
    assert!(apps < deep);

    let reloaded = Zone::load(&StrSource::new(text)).unwrap();
    assert_eq!(reloaded.record_count(), zone.record_count());
}
