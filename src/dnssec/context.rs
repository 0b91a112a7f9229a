use chrono::{DateTime, Duration, Utc};

use super::constants::{MAX_NSEC3_ITERATIONS, NSEC3_HASH_SHA1};
use super::errors::{DnsSecError, Result};
use super::{DnsSecAlgorithm, ZonemdHash};
use crate::dns::Nsec3Param;

/// NSEC3 chain parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec3Params {
    pub hash_algorithm: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    /// Leave insecure delegations out of the chain and set the Opt-Out flag
    pub opt_out: bool,
}

impl Default for Nsec3Params {
    /// RFC 9276 recommendation: SHA-1, no extra iterations, empty salt
    fn default() -> Self {
        Self {
            hash_algorithm: NSEC3_HASH_SHA1,
            iterations: 0,
            salt: Vec::new(),
            opt_out: false,
        }
    }
}

impl Nsec3Params {
    /// Flags field of the NSEC3 records
    pub fn flags(&self) -> u8 {
        if self.opt_out {
            crate::dns::Nsec3::OPT_OUT
        } else {
            0
        }
    }

    /// The NSEC3PARAM record announcing this chain. Its flags are always
    /// zero (RFC 5155 section 4.1.2).
    pub fn to_nsec3param(&self) -> Nsec3Param {
        Nsec3Param {
            hash_algorithm: self.hash_algorithm,
            flags: 0,
            iterations: self.iterations,
            salt: self.salt.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hash_algorithm != NSEC3_HASH_SHA1 {
            return Err(DnsSecError::InvalidNsec3Parameters(format!(
                "unknown hash algorithm {}",
                self.hash_algorithm
            )));
        }
        if self.iterations > MAX_NSEC3_ITERATIONS {
            return Err(DnsSecError::InvalidNsec3Parameters(format!(
                "{} iterations exceeds the maximum of {}",
                self.iterations, MAX_NSEC3_ITERATIONS
            )));
        }
        if self.salt.len() > 255 {
            return Err(DnsSecError::InvalidNsec3Parameters(
                "salt longer than 255 octets".to_string(),
            ));
        }
        Ok(())
    }
}

/// Authenticated denial of existence scheme
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DenialMode {
    #[default]
    Nsec,
    Nsec3(Nsec3Params),
}

/// Parameters of one signing run
#[derive(Debug, Clone)]
pub struct SigningContext {
    /// Signature inception, seconds since the epoch
    pub inception: u32,
    /// Signature expiration, seconds since the epoch
    pub expiration: u32,
    pub algorithm: DnsSecAlgorithm,
    pub denial: DenialMode,
    /// TTL of the DNSKEY RRset; the SOA TTL when unset
    pub dnskey_ttl: Option<u32>,
    /// Sign the DNSKEY RRset with the ZSK as well as the KSK
    pub sign_dnskey_with_zsk: bool,
    /// Add a ZONEMD record with this hash
    pub zonemd: Option<ZonemdHash>,
    /// Upper bound on concurrent signing operations
    pub workers: usize,
}

impl SigningContext {
    pub fn new(
        algorithm: DnsSecAlgorithm,
        denial: DenialMode,
        inception: u32,
        expiration: u32,
    ) -> Self {
        Self {
            inception,
            expiration,
            algorithm,
            denial,
            dnskey_ttl: None,
            sign_dnskey_with_zsk: false,
            zonemd: None,
            workers: default_workers(),
        }
    }

    /// Signatures valid from `now` for `days` days
    pub fn with_validity(
        algorithm: DnsSecAlgorithm,
        denial: DenialMode,
        now: DateTime<Utc>,
        days: u32,
    ) -> Result<Self> {
        let expiration = now + Duration::days(i64::from(days));
        let inception = u32::try_from(now.timestamp())
            .map_err(|_| DnsSecError::InvalidValidity(format!("inception {} out of range", now)))?;
        let expiration = u32::try_from(expiration.timestamp()).map_err(|_| {
            DnsSecError::InvalidValidity(format!("expiration {} out of range", expiration))
        })?;
        Ok(Self::new(algorithm, denial, inception, expiration))
    }

    pub fn validate(&self) -> Result<()> {
        if self.expiration <= self.inception {
            return Err(DnsSecError::InvalidValidity(format!(
                "expiration {} is not after inception {}",
                self.expiration, self.inception
            )));
        }
        if !self.algorithm.can_sign() {
            return Err(DnsSecError::UnsupportedAlgorithm(self.algorithm.to_u8()));
        }
        if let DenialMode::Nsec3(params) = &self.denial {
            params.validate()?;
        }
        Ok(())
    }
}

pub(crate) fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
