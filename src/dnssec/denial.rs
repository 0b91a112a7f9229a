use std::collections::BTreeMap;

use super::context::{DenialMode, Nsec3Params};
use super::errors::{DnsSecError, Result};
use super::nsec3::nsec3_hash;
use crate::dns::rdata::nsec3_label;
use crate::dns::{Name, Nsec, Nsec3, RData, RRset, RecordType, TypeBitmap};
use crate::zone::Zone;
use tracing::{debug, trace};

/// Types at `name` that belong in a denial bitmap before the NSEC/RRSIG
/// bits are decided. At a delegation only NS and DS are authoritative.
fn present_types(zone: &Zone, name: &Name) -> TypeBitmap {
    let at_cut = zone.is_zone_cut(name);
    zone.types_at(name)
        .filter(|t| !matches!(t, RecordType::RRSIG | RecordType::NSEC | RecordType::NSEC3))
        .filter(|t| !at_cut || matches!(t, RecordType::NS | RecordType::DS))
        .collect()
}

fn denial_ttl(zone: &Zone) -> Result<u32> {
    zone.negative_ttl()
        .ok_or_else(|| DnsSecError::ChainBuild("zone has no SOA record".to_string()))
}

/// NSEC records the zone should carry, in canonical order. Each
/// authoritative owner points at the next one and the last wraps around to
/// the apex.
pub fn nsec_chain(zone: &Zone) -> Result<Vec<(Name, Nsec)>> {
    let names = zone.authoritative_names();
    if names.is_empty() {
        return Err(DnsSecError::ChainBuild("zone has no owner names".to_string()));
    }

    let chain = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let next = names[(i + 1) % names.len()].clone();
            let mut types = present_types(zone, name);
            // The NSEC record and its signature live at every owner
            types.insert(RecordType::NSEC);
            types.insert(RecordType::RRSIG);
            trace!("NSEC {} -> {} [{}]", name, next, types);
            (
                name.clone(),
                Nsec {
                    next_name: next,
                    types,
                },
            )
        })
        .collect();

    Ok(chain)
}

/// NSEC3 records the zone should carry, in hash order, each paired with
/// its hashed owner name.
pub fn nsec3_chain(zone: &Zone, params: &Nsec3Params) -> Result<Vec<(Name, Nsec3)>> {
    params.validate()?;
    hashed_chain(zone, params, |name| {
        nsec3_hash(name, params.hash_algorithm, &params.salt, params.iterations)
    })
}

fn hashed_chain<H>(zone: &Zone, params: &Nsec3Params, hash_name: H) -> Result<Vec<(Name, Nsec3)>>
where
    H: Fn(&Name) -> Result<Vec<u8>>,
{
    let names: Vec<Name> = zone
        .authoritative_names()
        .into_iter()
        .filter(|name| {
            let skip = params.opt_out && zone.is_insecure_delegation(name);
            if skip {
                debug!("Opt-out: leaving insecure delegation {} out of the chain", name);
            }
            !skip
        })
        .collect();
    if names.is_empty() {
        return Err(DnsSecError::ChainBuild("zone has no owner names".to_string()));
    }

    let ents = zone.empty_non_terminals(names.iter());

    let mut hashed: BTreeMap<Vec<u8>, (Name, TypeBitmap)> = BTreeMap::new();
    let entries = names
        .iter()
        .map(|name| {
            let mut types = present_types(zone, name);
            // Insecure delegations carry no signatures
            if !zone.is_insecure_delegation(name) {
                types.insert(RecordType::RRSIG);
            }
            (name, types)
        })
        .chain(ents.iter().map(|name| (name, TypeBitmap::new())));

    for (name, types) in entries {
        let hash = hash_name(name)?;
        if let Some((other, _)) = hashed.get(&hash) {
            return Err(DnsSecError::Nsec3HashCollision(
                other.to_string(),
                name.to_string(),
            ));
        }
        hashed.insert(hash, (name.clone(), types));
    }

    let hashes: Vec<&Vec<u8>> = hashed.keys().collect();
    let mut chain = Vec::with_capacity(hashed.len());
    for (i, (hash, (name, types))) in hashed.iter().enumerate() {
        let next = hashes[(i + 1) % hashes.len()];
        let owner = zone
            .origin()
            .prepend_label(nsec3_label(hash).as_bytes())
            .map_err(DnsSecError::ChainBuild)?;
        trace!("NSEC3 {} ({}) [{}]", owner, name, types);
        chain.push((
            owner,
            Nsec3 {
                hash_algorithm: params.hash_algorithm,
                flags: params.flags(),
                iterations: params.iterations,
                salt: params.salt.clone(),
                next_hashed_owner: next.clone(),
                types: types.clone(),
            },
        ));
    }

    Ok(chain)
}

/// Adds a complete denial of existence chain to a zone
pub struct DenialChainBuilder<'a> {
    mode: &'a DenialMode,
}

impl<'a> DenialChainBuilder<'a> {
    pub fn new(mode: &'a DenialMode) -> Self {
        Self { mode }
    }

    /// Insert the chain into `zone`, replacing any previous one. For NSEC3
    /// the apex NSEC3PARAM is added as well. Returns the number of denial
    /// records created.
    pub fn build(&self, zone: &mut Zone) -> Result<usize> {
        zone.remove_types(|t| {
            matches!(t, RecordType::NSEC | RecordType::NSEC3 | RecordType::NSEC3PARAM)
        });

        let ttl = denial_ttl(zone)?;
        let origin = zone.origin().clone();
        let class = zone.class();

        let count = match self.mode {
            DenialMode::Nsec => {
                let chain = nsec_chain(zone)?;
                let count = chain.len();
                for (owner, nsec) in chain {
                    let mut set = RRset::new(owner, RecordType::NSEC, class, ttl);
                    set.insert(RData::Nsec(nsec));
                    zone.insert_rrset(set);
                }
                count
            }
            DenialMode::Nsec3(params) => {
                let mut param_set = RRset::new(origin.clone(), RecordType::NSEC3PARAM, class, ttl);
                param_set.insert(RData::Nsec3Param(params.to_nsec3param()));
                zone.insert_rrset(param_set);

                let chain = nsec3_chain(zone, params)?;
                let count = chain.len();
                for (owner, nsec3) in chain {
                    if zone.types_at(&owner).next().is_some() {
                        return Err(DnsSecError::ChainBuild(format!(
                            "hashed owner {} clashes with existing zone data",
                            owner
                        )));
                    }
                    let mut set = RRset::new(owner, RecordType::NSEC3, class, ttl);
                    set.insert(RData::Nsec3(nsec3));
                    zone.insert_rrset(set);
                }
                count
            }
        };

        debug!("Built denial chain of {} records for {}", count, origin);
        Ok(count)
    }
}
