use ring::digest;

use super::constants::NSEC3_HASH_SHA1;
use super::errors::{DnsSecError, Result};
use crate::dns::Name;

/// Iterated, salted hash of an owner name (RFC 5155 section 5):
/// `IH(salt, x, 0) = H(x || salt)`, `IH(salt, x, k) = H(IH(salt, x, k-1) || salt)`.
pub fn nsec3_hash(name: &Name, hash_algorithm: u8, salt: &[u8], iterations: u16) -> Result<Vec<u8>> {
    if hash_algorithm != NSEC3_HASH_SHA1 {
        return Err(DnsSecError::InvalidNsec3Parameters(format!(
            "unknown hash algorithm {}",
            hash_algorithm
        )));
    }

    let mut input = name.to_canonical_wire();
    input.extend_from_slice(salt);
    let mut hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &input);

    for _ in 0..iterations {
        let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);
        ctx.update(hash.as_ref());
        ctx.update(salt);
        hash = ctx.finish();
    }

    Ok(hash.as_ref().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::nsec3_label;

    fn hashed(name: &str) -> String {
        let name: Name = name.parse().unwrap();
        let salt = hex::decode("aabbccdd").unwrap();
        nsec3_label(&nsec3_hash(&name, 1, &salt, 12).unwrap())
    }

    #[test]
    fn test_rfc5155_appendix_a_hashes() {
        assert_eq!(hashed("example."), "0p9mhaveqvm6t7vbl5lop2u3t2rp3tom");
        assert_eq!(hashed("a.example."), "35mthgpgcu1qg68fab165klnsnk3dpvl");
        assert_eq!(hashed("ns1.example."), "2t7b4g4vsa5smi47k61mv5bv1a22bojr");
    }

    #[test]
    fn test_hash_ignores_case() {
        assert_eq!(hashed("A.EXAMPLE."), hashed("a.example."));
    }

    #[test]
    fn test_unknown_hash_algorithm() {
        let name: Name = "example.".parse().unwrap();
        assert!(nsec3_hash(&name, 2, &[], 0).is_err());
    }
}
