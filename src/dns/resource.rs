use std::fmt;

use super::{Name, RData, RecordClass, RecordType};

/// A single resource record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: Name,
    pub ttl: u32,
    pub class: RecordClass,
    pub rtype: RecordType,
    pub rdata: RData,
}

impl ResourceRecord {
    pub fn new(name: Name, ttl: u32, class: RecordClass, rtype: RecordType, rdata: RData) -> Self {
        Self {
            name,
            ttl,
            class,
            rtype,
            rdata,
        }
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.name, self.ttl, self.class, self.rtype, self.rdata
        )
    }
}

/// All records sharing owner, class and type.
///
/// RDATA is kept in canonical order (RFC 4034 section 6.3) without
/// duplicates, so iteration order is the order used for signing and
/// digesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RRset {
    pub name: Name,
    pub rtype: RecordType,
    pub class: RecordClass,
    pub ttl: u32,
    rdata: Vec<(Vec<u8>, RData)>,
}

impl RRset {
    pub fn new(name: Name, rtype: RecordType, class: RecordClass, ttl: u32) -> Self {
        Self {
            name,
            rtype,
            class,
            ttl,
            rdata: Vec::new(),
        }
    }

    /// Build an RRset holding a single record's data
    pub fn from_record(record: ResourceRecord) -> Self {
        let mut set = Self::new(record.name, record.rtype, record.class, record.ttl);
        set.insert(record.rdata);
        set
    }

    /// Insert RDATA at its canonical position. Returns false for a
    /// duplicate, which is dropped.
    pub fn insert(&mut self, rdata: RData) -> bool {
        let wire = rdata.to_wire(true);
        match self.rdata.binary_search_by(|(w, _)| w.cmp(&wire)) {
            Ok(_) => false,
            Err(pos) => {
                self.rdata.insert(pos, (wire, rdata));
                true
            }
        }
    }

    /// Remove every entry matching `pred`
    pub fn retain<F: FnMut(&RData) -> bool>(&mut self, mut pred: F) {
        self.rdata.retain(|(_, rdata)| pred(rdata));
    }

    pub fn len(&self) -> usize {
        self.rdata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdata.is_empty()
    }

    /// RDATA in canonical order
    pub fn rdata(&self) -> impl Iterator<Item = &RData> {
        self.rdata.iter().map(|(_, rdata)| rdata)
    }

    /// Canonical wire form of each RDATA, in canonical order
    pub fn canonical_rdata(&self) -> impl Iterator<Item = &[u8]> {
        self.rdata.iter().map(|(wire, _)| wire.as_slice())
    }

    pub fn first(&self) -> Option<&RData> {
        self.rdata.first().map(|(_, rdata)| rdata)
    }

    /// Expand back into individual records
    pub fn records(&self) -> impl Iterator<Item = ResourceRecord> + '_ {
        self.rdata.iter().map(move |(_, rdata)| {
            ResourceRecord::new(
                self.name.clone(),
                self.ttl,
                self.class,
                self.rtype,
                rdata.clone(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    #[test]
    fn test_rrset_sorts_and_dedups() {
        let mut set = RRset::new(name("www.example.com."), RecordType::A, RecordClass::IN, 300);
        assert!(set.insert(RData::A(Ipv4Addr::new(192, 0, 2, 20))));
        assert!(set.insert(RData::A(Ipv4Addr::new(192, 0, 2, 3))));
        assert!(!set.insert(RData::A(Ipv4Addr::new(192, 0, 2, 20))));

        let addrs: Vec<_> = set.rdata().cloned().collect();
        assert_eq!(
            addrs,
            vec![
                RData::A(Ipv4Addr::new(192, 0, 2, 3)),
                RData::A(Ipv4Addr::new(192, 0, 2, 20)),
            ]
        );
    }

    #[test]
    fn test_case_only_duplicates_collapse() {
        let mut set = RRset::new(name("example.com."), RecordType::NS, RecordClass::IN, 300);
        assert!(set.insert(RData::Ns(name("ns1.example.com."))));
        assert!(!set.insert(RData::Ns(name("NS1.EXAMPLE.COM."))));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_record_display() {
        let record = ResourceRecord::new(
            name("www.example.com."),
            300,
            RecordClass::IN,
            RecordType::A,
            RData::A(Ipv4Addr::new(192, 0, 2, 1)),
        );
        assert_eq!(record.to_string(), "www.example.com.\t300\tIN\tA\t192.0.2.1");
    }
}
