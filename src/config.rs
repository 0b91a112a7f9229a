use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dnssec::context::default_workers;
use crate::dnssec::{DenialMode, DnsSecAlgorithm, Nsec3Params, SigningContext, ZonemdHash};
use crate::error::{Error, Result};

/// Configuration file names looked up when no path is given, in order
pub const CONFIG_CANDIDATES: &[&str] = &[
    "/etc/dns-tools/dns-tools-config.toml",
    "/etc/dns-tools/dns-tools-config.json",
    "./dns-tools-config.toml",
    "./dns-tools-config.json",
];

/// Prefix of the environment variables that override the file
pub const ENV_PREFIX: &str = "DNS_TOOLS_";

/// Where private keys live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Pkcs11,
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenialKind {
    #[default]
    Nsec,
    Nsec3,
}

/// Whether to add a ZONEMD record, and with which hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZonemdSetting {
    #[default]
    None,
    Sha384,
    Sha512,
}

impl ZonemdSetting {
    pub fn hash(self) -> Option<ZonemdHash> {
        match self {
            Self::None => None,
            Self::Sha384 => Some(ZonemdHash::Sha384),
            Self::Sha512 => Some(ZonemdHash::Sha512),
        }
    }
}

/// User PIN. Kept out of debug output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pin(String);

impl Pin {
    pub fn new(pin: impl Into<String>) -> Self {
        Self(pin.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(****)")
    }
}

/// Options for every tool operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub backend: Backend,

    /// PKCS#11 module to load
    pub hsm_library_path: Option<PathBuf>,

    /// PKCS#11 slot holding the keys
    pub slot: u64,

    pub pin: Option<Pin>,

    /// Directory of the soft token; keys stay in memory when unset
    pub soft_token_dir: Option<PathBuf>,

    pub zsk_label: String,
    pub ksk_label: String,

    pub algorithm: DnsSecAlgorithm,

    /// Signature validity from now, in days
    pub validity_days: u32,

    pub denial_mode: DenialKind,

    /// NSEC3 salt, hex encoded; empty for none
    pub nsec3_salt: String,
    pub nsec3_iterations: u16,
    pub nsec3_opt_out: bool,

    /// Generate missing keys instead of failing
    pub create_keys: bool,

    /// Bound on every HSM call
    pub hsm_timeout_secs: u64,

    /// Concurrent signing requests
    pub workers: usize,

    /// Tolerance when checking signature validity windows
    pub clock_skew_secs: u32,

    pub zonemd: ZonemdSetting,

    /// DNSKEY RRset TTL; the SOA TTL when unset
    pub dnskey_ttl: Option<u32>,

    /// Sign the DNSKEY RRset with the ZSK too
    pub sign_dnskey_with_zsk: bool,

    /// Zone origin when the file has neither `$ORIGIN` nor an SOA to infer it
    pub origin: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            hsm_library_path: None,
            slot: 0,
            pin: None,
            soft_token_dir: None,
            zsk_label: "zsk-dns-tools".to_string(),
            ksk_label: "ksk-dns-tools".to_string(),
            algorithm: DnsSecAlgorithm::EcdsaP256Sha256,
            validity_days: 30,
            denial_mode: DenialKind::default(),
            nsec3_salt: String::new(),
            nsec3_iterations: 0,
            nsec3_opt_out: false,
            create_keys: true,
            hsm_timeout_secs: 30,
            workers: default_workers(),
            clock_skew_secs: 0,
            zonemd: ZonemdSetting::default(),
            dnskey_ttl: None,
            sign_dnskey_with_zsk: false,
            origin: None,
        }
    }
}

impl ToolConfig {
    /// Load the configuration: the given file or the first candidate that
    /// exists, then environment overrides, then validation. Without any file
    /// the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::discover(),
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// First existing file among [`CONFIG_CANDIDATES`]
    pub fn discover() -> Option<PathBuf> {
        CONFIG_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|path| path.is_file())
    }

    /// Parse a TOML or JSON file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loading configuration from {}", path.display());

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e))),
            Some("toml") => {
                toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
            }
            _ => Err(Error::Config(format!(
                "{}: configuration must be .toml or .json",
                path.display()
            ))),
        }
    }

    /// Apply `DNS_TOOLS_*` overrides, looking variables up with `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let invalid = |name: &str, value: &str| {
            Error::Config(format!("invalid {}{}: {}", ENV_PREFIX, name, value))
        };

        if let Some(value) = var("BACKEND") {
            self.backend = match value.to_lowercase().as_str() {
                "pkcs11" => Backend::Pkcs11,
                "soft" => Backend::Soft,
                _ => return Err(invalid("BACKEND", &value)),
            };
        }
        if let Some(value) = var("HSM_LIBRARY_PATH") {
            self.hsm_library_path = Some(PathBuf::from(value));
        }
        if let Some(value) = var("SLOT") {
            self.slot = value.parse().map_err(|_| invalid("SLOT", &value))?;
        }
        if let Some(value) = var("PIN") {
            self.pin = Some(Pin::new(value));
        }
        if let Some(value) = var("SOFT_TOKEN_DIR") {
            self.soft_token_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = var("ZSK_LABEL") {
            self.zsk_label = value;
        }
        if let Some(value) = var("KSK_LABEL") {
            self.ksk_label = value;
        }
        if let Some(value) = var("ALGORITHM") {
            self.algorithm = value.parse().map_err(|_| invalid("ALGORITHM", &value))?;
        }
        if let Some(value) = var("VALIDITY_DAYS") {
            self.validity_days = value.parse().map_err(|_| invalid("VALIDITY_DAYS", &value))?;
        }
        if let Some(value) = var("DENIAL_MODE") {
            self.denial_mode = match value.to_lowercase().as_str() {
                "nsec" => DenialKind::Nsec,
                "nsec3" => DenialKind::Nsec3,
                _ => return Err(invalid("DENIAL_MODE", &value)),
            };
        }
        if let Some(value) = var("NSEC3_SALT") {
            self.nsec3_salt = value;
        }
        if let Some(value) = var("NSEC3_ITERATIONS") {
            self.nsec3_iterations = value
                .parse()
                .map_err(|_| invalid("NSEC3_ITERATIONS", &value))?;
        }
        if let Some(value) = var("NSEC3_OPT_OUT") {
            self.nsec3_opt_out = parse_bool(&value).ok_or_else(|| invalid("NSEC3_OPT_OUT", &value))?;
        }
        if let Some(value) = var("CREATE_KEYS") {
            self.create_keys = parse_bool(&value).ok_or_else(|| invalid("CREATE_KEYS", &value))?;
        }
        if let Some(value) = var("HSM_TIMEOUT_SECS") {
            self.hsm_timeout_secs = value
                .parse()
                .map_err(|_| invalid("HSM_TIMEOUT_SECS", &value))?;
        }
        if let Some(value) = var("WORKERS") {
            self.workers = value.parse().map_err(|_| invalid("WORKERS", &value))?;
        }
        if let Some(value) = var("CLOCK_SKEW_SECS") {
            self.clock_skew_secs = value
                .parse()
                .map_err(|_| invalid("CLOCK_SKEW_SECS", &value))?;
        }
        if let Some(value) = var("ZONEMD") {
            self.zonemd = match value.to_lowercase().as_str() {
                "none" | "" => ZonemdSetting::None,
                "sha384" => ZonemdSetting::Sha384,
                "sha512" => ZonemdSetting::Sha512,
                _ => return Err(invalid("ZONEMD", &value)),
            };
        }
        if let Some(value) = var("DNSKEY_TTL") {
            self.dnskey_ttl = Some(value.parse().map_err(|_| invalid("DNSKEY_TTL", &value))?);
        }
        if let Some(value) = var("SIGN_DNSKEY_WITH_ZSK") {
            self.sign_dnskey_with_zsk = parse_bool(&value).ok_or_else(|| invalid("SIGN_DNSKEY_WITH_ZSK", &value))?;
        }
        if let Some(value) = var("ORIGIN") {
            self.origin = Some(value);
        }

        Ok(())
    }

    /// Reject settings that cannot work together
    pub fn validate(&self) -> Result<()> {
        if self.zsk_label.is_empty() || self.ksk_label.is_empty() {
            return Err(Error::Config("key labels must not be empty".to_string()));
        }
        if self.zsk_label == self.ksk_label {
            return Err(Error::Config(
                "ZSK and KSK labels must differ".to_string(),
            ));
        }
        if !self.algorithm.can_sign() {
            return Err(Error::Config(format!(
                "{} may be verified but not used for signing",
                self.algorithm
            )));
        }
        if self.validity_days == 0 {
            return Err(Error::Config("validity_days must be at least 1".to_string()));
        }
        if self.hsm_timeout_secs == 0 {
            return Err(Error::Config("hsm_timeout_secs must be greater than 0".to_string()));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be greater than 0".to_string()));
        }
        if self.denial_mode == DenialKind::Nsec3 {
            self.nsec3_params()?
                .validate()
                .map_err(|e| Error::Config(e.to_string()))?;
        }
        Ok(())
    }

    pub fn nsec3_params(&self) -> Result<Nsec3Params> {
        let salt = match self.nsec3_salt.as_str() {
            "" | "-" => Vec::new(),
            hex_salt => hex::decode(hex_salt)
                .map_err(|e| Error::Config(format!("invalid nsec3_salt: {}", e)))?,
        };
        Ok(Nsec3Params {
            salt,
            iterations: self.nsec3_iterations,
            opt_out: self.nsec3_opt_out,
            ..Nsec3Params::default()
        })
    }

    pub fn denial(&self) -> Result<DenialMode> {
        Ok(match self.denial_mode {
            DenialKind::Nsec => DenialMode::Nsec,
            DenialKind::Nsec3 => DenialMode::Nsec3(self.nsec3_params()?),
        })
    }

    /// Signing parameters for a run starting at `now`
    pub fn signing_context(&self, now: DateTime<Utc>) -> Result<SigningContext> {
        let mut context =
            SigningContext::with_validity(self.algorithm, self.denial()?, now, self.validity_days)?;
        context.dnskey_ttl = self.dnskey_ttl;
        context.sign_dnskey_with_zsk = self.sign_dnskey_with_zsk;
        context.zonemd = self.zonemd.hash();
        context.workers = self.workers;
        Ok(context)
    }

    pub fn hsm_timeout(&self) -> Duration {
        Duration::from_secs(self.hsm_timeout_secs)
    }
}

/// Parse a boolean from a string, with a default value for invalid input
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn soft() -> ToolConfig {
        ToolConfig {
            backend: Backend::Soft,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_load_without_hsm() {
        // The library path is only needed once a token is opened
        assert!(ToolConfig::default().validate().is_ok());
        assert!(soft().validate().is_ok());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dns-tools-config.toml");
        std::fs::write(&path, "zonemd = \"sha512\"\n").unwrap();
        let config = ToolConfig::load(Some(&path)).unwrap();
        assert_eq!(config.backend, Backend::Pkcs11);
        assert!(config.hsm_library_path.is_none());
    }

    #[test]
    fn test_invalid_combinations() {
        let config = ToolConfig {
            ksk_label: "zsk-dns-tools".to_string(),
            ..soft()
        };
        assert!(config.validate().is_err());

        let config = ToolConfig {
            algorithm: DnsSecAlgorithm::RsaSha1,
            ..soft()
        };
        assert!(config.validate().is_err());

        let config = ToolConfig {
            denial_mode: DenialKind::Nsec3,
            nsec3_salt: "not hex".to_string(),
            ..soft()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DNS_TOOLS_BACKEND", "soft"),
            ("DNS_TOOLS_DENIAL_MODE", "nsec3"),
            ("DNS_TOOLS_NSEC3_SALT", "aabbccdd"),
            ("DNS_TOOLS_NSEC3_OPT_OUT", "yes"),
            ("DNS_TOOLS_ALGORITHM", "ED25519"),
            ("DNS_TOOLS_ZONEMD", "sha512"),
            ("DNS_TOOLS_PIN", "1234"),
        ]
        .into_iter()
        .collect();

        let mut config = ToolConfig::default();
        config
            .apply_env_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.backend, Backend::Soft);
        assert_eq!(config.algorithm, DnsSecAlgorithm::Ed25519);
        assert_eq!(config.zonemd.hash(), Some(ZonemdHash::Sha512));
        assert_eq!(config.pin.as_ref().map(Pin::expose), Some("1234"));
        assert!(!format!("{:?}", config).contains("1234"));

        match config.denial().unwrap() {
            DenialMode::Nsec3(params) => {
                assert_eq!(params.salt, vec![0xaa, 0xbb, 0xcc, 0xdd]);
                assert!(params.opt_out);
            }
            other => panic!("unexpected denial mode {:?}", other),
        }
    }

    #[test]
    fn test_env_rejects_garbage() {
        for (name, value) in [
            ("DNS_TOOLS_WORKERS", "many"),
            ("DNS_TOOLS_CREATE_KEYS", "ture"),
            ("DNS_TOOLS_NSEC3_OPT_OUT", "maybe"),
            ("DNS_TOOLS_SIGN_DNSKEY_WITH_ZSK", ""),
        ] {
            let mut config = ToolConfig::default();
            let result = config.apply_env_from(|key| (key == name).then(|| value.to_string()));
            assert!(matches!(result, Err(Error::Config(_))), "{}={:?}", name, value);
            assert!(config.create_keys);
        }

        let mut config = ToolConfig::default();
        config
            .apply_env_from(|key| (key == "DNS_TOOLS_CREATE_KEYS").then(|| "Off".to_string()))
            .unwrap();
        assert!(!config.create_keys);
    }

    #[test]
    fn test_file_formats() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("dns-tools-config.toml");
        std::fs::write(
            &toml_path,
            "backend = \"soft\"\nalgorithm = \"ECDSAP384SHA384\"\nvalidity_days = 7\nzonemd = \"sha384\"\n",
        )
        .unwrap();
        let config = ToolConfig::from_file(&toml_path).unwrap();
        assert_eq!(config.algorithm, DnsSecAlgorithm::EcdsaP384Sha384);
        assert_eq!(config.validity_days, 7);
        assert_eq!(config.zonemd, ZonemdSetting::Sha384);
        assert_eq!(config.zsk_label, "zsk-dns-tools");

        let json_path = dir.path().join("dns-tools-config.json");
        std::fs::write(&json_path, r#"{"backend": "soft", "denial_mode": "nsec3", "nsec3_iterations": 5}"#)
            .unwrap();
        let config = ToolConfig::from_file(&json_path).unwrap();
        assert_eq!(config.denial_mode, DenialKind::Nsec3);
        assert_eq!(config.nsec3_iterations, 5);

        let other = dir.path().join("config.yaml");
        std::fs::write(&other, "backend: soft").unwrap();
        assert!(matches!(ToolConfig::from_file(&other), Err(Error::Config(_))));
    }

    #[test]
    fn test_signing_context() {
        let config = ToolConfig {
            sign_dnskey_with_zsk: true,
            dnskey_ttl: Some(600),
            workers: 3,
            ..soft()
        };
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let ctx = config.signing_context(now).unwrap();
        assert_eq!(ctx.expiration - ctx.inception, 30 * 86400);
        assert!(ctx.sign_dnskey_with_zsk);
        assert_eq!(ctx.dnskey_ttl, Some(600));
        assert_eq!(ctx.workers, 3);
        assert_eq!(ctx.denial, DenialMode::Nsec);
    }
}
