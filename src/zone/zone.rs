use super::io::ZoneSource;
use super::parser::ZoneParser;
use super::{Result, ZoneError};
use crate::dns::{Name, RData, RRset, RecordClass, RecordType, ResourceRecord, Soa};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// A DNS zone with all its records, grouped into RRsets.
///
/// RRsets are keyed by owner and type. `Name` orders canonically and
/// `RecordType` by code, so iterating the map yields the canonical zone
/// order every consumer relies on.
#[derive(Debug, Clone)]
pub struct Zone {
    origin: Name,
    class: RecordClass,
    rrsets: BTreeMap<(Name, RecordType), RRset>,
}

impl Zone {
    /// Create a new empty zone
    pub fn new(origin: Name, class: RecordClass) -> Self {
        Self {
            origin,
            class,
            rrsets: BTreeMap::new(),
        }
    }

    /// Read and parse a zone from `source`
    pub fn load(source: &dyn ZoneSource) -> Result<Self> {
        Self::load_with_origin(source, None)
    }

    /// Like [`Zone::load`], with an origin for files that lack `$ORIGIN`
    pub fn load_with_origin(source: &dyn ZoneSource, origin: Option<Name>) -> Result<Self> {
        let contents = source.read_to_string()?;

        let mut parser = ZoneParser::new();
        if let Some(origin) = origin {
            parser = parser.with_origin(origin);
        }
        if let Some(dir) = source.base_dir() {
            parser = parser.with_base_dir(dir);
        }

        let records = parser.parse_str(&contents, &source.describe())?;
        let origin = Self::find_origin(&parser, &records)?;
        let zone = Self::from_records(origin, records)?;

        debug!(
            "Loaded zone {} with {} RRsets from {}",
            zone.origin,
            zone.rrsets.len(),
            source.describe()
        );
        Ok(zone)
    }

    /// The zone origin is the SOA owner. Without an SOA, an origin known to
    /// the parser means the SOA is missing; no origin at all means the
    /// origin is unknown.
    fn find_origin(parser: &ZoneParser, records: &[ResourceRecord]) -> Result<Name> {
        let soa_owner = records
            .iter()
            .find(|r| r.rtype == RecordType::SOA)
            .map(|r| r.name.clone());
        match (soa_owner, parser.origin()) {
            (Some(owner), _) => Ok(owner),
            (None, Some(_)) => Err(ZoneError::MissingSOA),
            (None, None) => Err(ZoneError::MissingOrigin(
                "no $ORIGIN, no origin given and no SOA record".to_string(),
            )),
        }
    }

    /// Build a zone from parsed records, enforcing the zone invariants:
    /// exactly one SOA at the origin, every owner inside the origin and one
    /// TTL per RRset. Duplicate records collapse.
    pub fn from_records(origin: Name, records: Vec<ResourceRecord>) -> Result<Self> {
        let class = records
            .iter()
            .find(|r| r.rtype == RecordType::SOA)
            .map(|r| r.class)
            .unwrap_or_default();
        let mut zone = Self::new(origin, class);

        for record in records {
            zone.add_record(record)?;
        }

        zone.validate()?;
        Ok(zone)
    }

    /// Add a record, merging it into its RRset
    pub fn add_record(&mut self, record: ResourceRecord) -> Result<()> {
        if !record.name.is_subdomain_of(&self.origin) {
            return Err(ZoneError::OutOfZone(
                record.name.to_string(),
                self.origin.to_string(),
            ));
        }
        if record.class != self.class {
            return Err(ZoneError::InvalidRecord(format!(
                "{} {} has class {}, zone class is {}",
                record.name, record.rtype, record.class, self.class
            )));
        }

        if record.rtype == RecordType::SOA {
            if record.name != self.origin {
                return Err(ZoneError::InvalidRecord(format!(
                    "SOA record at {} is not at the zone apex {}",
                    record.name, self.origin
                )));
            }
            if let Some(existing) = self.get(&self.origin, RecordType::SOA) {
                if existing.first() != Some(&record.rdata) {
                    return Err(ZoneError::DuplicateSOA);
                }
            }
        }

        match self.rrsets.entry((record.name.clone(), record.rtype)) {
            Entry::Vacant(slot) => {
                slot.insert(RRset::from_record(record));
            }
            Entry::Occupied(mut slot) => {
                let rrset = slot.get_mut();
                if rrset.ttl != record.ttl {
                    // RRSIGs over different types legitimately differ
                    if record.rtype == RecordType::RRSIG {
                        rrset.ttl = rrset.ttl.min(record.ttl);
                    } else {
                        return Err(ZoneError::TtlMismatch {
                            name: record.name.to_string(),
                            rtype: record.rtype.to_string(),
                            first: rrset.ttl,
                            second: record.ttl,
                        });
                    }
                }
                if !rrset.insert(record.rdata) {
                    warn!("Dropping duplicate record at {} {}", rrset.name, rrset.rtype);
                }
            }
        }
        Ok(())
    }

    /// Validate the zone
    pub fn validate(&self) -> Result<()> {
        let soa = self
            .get(&self.origin, RecordType::SOA)
            .ok_or(ZoneError::MissingSOA)?;
        if soa.len() != 1 {
            return Err(ZoneError::DuplicateSOA);
        }

        if self.get(&self.origin, RecordType::NS).is_none() {
            warn!("Zone {} has no NS records at the apex", self.origin);
        }

        for (name, rtype) in self.rrsets.keys() {
            if *rtype == RecordType::CNAME {
                let others = self
                    .types_at(name)
                    .filter(|t| !matches!(t, RecordType::CNAME | RecordType::RRSIG | RecordType::NSEC))
                    .count();
                if others > 0 {
                    return Err(ZoneError::InvalidRecord(format!(
                        "CNAME at {} coexists with other data",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn origin(&self) -> &Name {
        &self.origin
    }

    pub fn class(&self) -> RecordClass {
        self.class
    }

    /// The apex SOA RRset
    pub fn soa_rrset(&self) -> Option<&RRset> {
        self.get(&self.origin, RecordType::SOA)
    }

    pub fn soa(&self) -> Option<&Soa> {
        self.soa_rrset().and_then(|set| set.first()).and_then(RData::as_soa)
    }

    /// TTL for denial of existence records: min(SOA TTL, SOA minimum)
    /// (RFC 9077)
    pub fn negative_ttl(&self) -> Option<u32> {
        let rrset = self.soa_rrset()?;
        let soa = self.soa()?;
        Some(rrset.ttl.min(soa.minimum))
    }

    pub fn get(&self, name: &Name, rtype: RecordType) -> Option<&RRset> {
        self.rrsets.get(&(name.clone(), rtype))
    }

    pub fn get_mut(&mut self, name: &Name, rtype: RecordType) -> Option<&mut RRset> {
        self.rrsets.get_mut(&(name.clone(), rtype))
    }

    /// Insert or replace a whole RRset
    pub fn insert_rrset(&mut self, rrset: RRset) -> Option<RRset> {
        self.rrsets
            .insert((rrset.name.clone(), rrset.rtype), rrset)
    }

    pub fn remove_rrset(&mut self, name: &Name, rtype: RecordType) -> Option<RRset> {
        self.rrsets.remove(&(name.clone(), rtype))
    }

    /// Drop every RRset whose type matches `pred`, returning how many went
    pub fn remove_types<F: Fn(RecordType) -> bool>(&mut self, pred: F) -> usize {
        let before = self.rrsets.len();
        self.rrsets.retain(|(_, rtype), _| !pred(*rtype));
        before - self.rrsets.len()
    }

    /// All RRsets in canonical order
    pub fn canonical_order(&self) -> impl Iterator<Item = &RRset> {
        self.rrsets.values()
    }

    /// All records in canonical order
    pub fn records(&self) -> impl Iterator<Item = ResourceRecord> + '_ {
        self.rrsets.values().flat_map(RRset::records)
    }

    pub fn rrset_count(&self) -> usize {
        self.rrsets.len()
    }

    pub fn record_count(&self) -> usize {
        self.rrsets.values().map(RRset::len).sum()
    }

    /// Distinct owner names in canonical order
    pub fn names(&self) -> impl Iterator<Item = &Name> {
        let mut last: Option<&Name> = None;
        self.rrsets.keys().filter_map(move |(name, _)| {
            if last == Some(name) {
                None
            } else {
                last = Some(name);
                Some(name)
            }
        })
    }

    /// Types present at `name`
    pub fn types_at<'a>(&'a self, name: &Name) -> impl Iterator<Item = RecordType> + 'a {
        let start = (name.clone(), RecordType::Unknown(0));
        let name = name.clone();
        self.rrsets
            .range(start..)
            .take_while(move |((n, _), _)| *n == name)
            .map(|((_, t), _)| *t)
    }

    /// RRsets at `name`, in type order
    pub fn rrsets_at<'a>(&'a self, name: &Name) -> impl Iterator<Item = &'a RRset> + 'a {
        let start = (name.clone(), RecordType::Unknown(0));
        let name = name.clone();
        self.rrsets
            .range(start..)
            .take_while(move |((n, _), _)| *n == name)
            .map(|(_, set)| set)
    }

    /// A delegation point: NS records below the apex
    pub fn is_zone_cut(&self, name: &Name) -> bool {
        *name != self.origin && self.get(name, RecordType::NS).is_some()
    }

    /// Delegation points in canonical order
    pub fn zone_cuts(&self) -> Vec<Name> {
        self.rrsets
            .keys()
            .filter(|(name, rtype)| *rtype == RecordType::NS && *name != self.origin)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// True if `name` lies strictly below a zone cut or a DNAME, so data
    /// there is not authoritative (glue and occluded records).
    pub fn is_occluded(&self, name: &Name) -> bool {
        let mut current = name.parent();
        while let Some(ancestor) = current {
            if !ancestor.is_subdomain_of(&self.origin) || ancestor == self.origin {
                break;
            }
            if self.get(&ancestor, RecordType::NS).is_some()
                || self.get(&ancestor, RecordType::DNAME).is_some()
            {
                return true;
            }
            current = ancestor.parent();
        }
        false
    }

    /// A delegation without a DS RRset
    pub fn is_insecure_delegation(&self, name: &Name) -> bool {
        self.is_zone_cut(name) && self.get(name, RecordType::DS).is_none()
    }

    /// Whether the zone is authoritative for this RRset and so signs it.
    /// At a zone cut only DS and the denial records are.
    pub fn is_authoritative(&self, rrset: &RRset) -> bool {
        if self.is_occluded(&rrset.name) {
            return false;
        }
        if self.is_zone_cut(&rrset.name) {
            return matches!(
                rrset.rtype,
                RecordType::DS | RecordType::NSEC | RecordType::RRSIG
            );
        }
        true
    }

    /// Authoritative RRsets in canonical order
    pub fn authoritative_rrsets(&self) -> impl Iterator<Item = &RRset> {
        self.rrsets
            .values()
            .filter(move |set| self.is_authoritative(set))
    }

    /// Owner names that belong in a denial chain: the apex, names holding
    /// authoritative data and delegation points. Glue is excluded.
    pub fn authoritative_names(&self) -> Vec<Name> {
        self.names()
            .filter(|name| !self.is_occluded(name))
            .filter(|name| {
                // Names holding nothing but denial material from an old run
                self.types_at(name).any(|t| {
                    !matches!(t, RecordType::NSEC | RecordType::NSEC3 | RecordType::RRSIG)
                })
            })
            .cloned()
            .collect()
    }

    /// Names between the apex and `names` that own no records themselves
    pub fn empty_non_terminals<'a, I>(&self, names: I) -> BTreeSet<Name>
    where
        I: IntoIterator<Item = &'a Name>,
    {
        let present: BTreeSet<&Name> = self.names().collect();
        let mut ents = BTreeSet::new();
        for name in names {
            let mut current = name.parent();
            while let Some(ancestor) = current {
                if ancestor == self.origin || !ancestor.is_subdomain_of(&self.origin) {
                    break;
                }
                if !present.contains(&ancestor) {
                    ents.insert(ancestor.clone());
                }
                current = ancestor.parent();
            }
        }
        ents
    }
}
