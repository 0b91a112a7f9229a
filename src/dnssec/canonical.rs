//! Canonical encodings that signatures and digests are computed over.

use super::errors::{DnsSecError, Result};
use crate::dns::{Name, RRset, RecordClass, RecordType, Rrsig};

/// Append one RR in canonical wire form (RFC 4034 section 6.2)
pub fn write_canonical_rr(
    out: &mut Vec<u8>,
    owner: &Name,
    rtype: RecordType,
    class: RecordClass,
    ttl: u32,
    rdata: &[u8],
) -> Result<()> {
    let rdlength = u16::try_from(rdata.len())
        .map_err(|_| DnsSecError::RdataTooLong(format!("{} {}", owner, rtype), rdata.len()))?;
    owner.write_wire(out, true);
    out.extend_from_slice(&rtype.to_u16().to_be_bytes());
    out.extend_from_slice(&u16::from(class).to_be_bytes());
    out.extend_from_slice(&ttl.to_be_bytes());
    out.extend_from_slice(&rdlength.to_be_bytes());
    out.extend_from_slice(rdata);
    Ok(())
}

/// Owner name an RRSIG covers: for a wildcard expansion the labels field is
/// shorter than the owner and the signed name is `*.` plus the rightmost
/// `labels` labels (RFC 4035 section 5.3.2).
fn signed_owner(owner: &Name, labels: u8) -> Name {
    let labels = usize::from(labels);
    if labels >= owner.label_count() {
        return owner.clone();
    }
    let skip = owner.label_count() - labels;
    Name::from_labels(owner.labels()[skip..].iter().cloned())
        .and_then(|suffix| suffix.prepend_label(b"*"))
        .unwrap_or_else(|_| owner.clone())
}

/// The data an RRSIG signs (RFC 4034 section 3.1.8.1): the RRSIG RDATA
/// without the signature, followed by every RR of the set in canonical
/// order with the original TTL.
pub fn rrsig_signed_data(rrsig: &Rrsig, rrset: &RRset) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    rrsig.write_signed_fields(&mut out);

    let owner = signed_owner(&rrset.name, rrsig.labels);
    for rdata in rrset.canonical_rdata() {
        write_canonical_rr(
            &mut out,
            &owner,
            rrset.rtype,
            rrset.class,
            rrsig.original_ttl,
            rdata,
        )?;
    }
    Ok(out)
}
