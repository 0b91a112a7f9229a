//! Software token backed by `ring`.
//!
//! Keys live in memory and, when a directory is configured, are also stored
//! there as one JSON document per key so they survive between runs. Used for
//! tests and for operating without an HSM.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use ring::rand::SystemRandom;
use ring::signature::{self, EcdsaKeyPair, Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::errors::TokenError;
use super::keys::TokenKey;
use super::token::{Token, TokenSession};
use crate::dnssec::DnsSecAlgorithm;

/// A key as persisted on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredKey {
    label: String,
    /// Object id, hex encoded
    id: String,
    algorithm: u8,
    /// PKCS#8 private key document, base64 encoded
    pkcs8: String,
}

#[derive(Debug, Clone)]
struct SoftKey {
    label: String,
    id: Vec<u8>,
    algorithm: DnsSecAlgorithm,
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl SoftKey {
    fn token_key(&self) -> TokenKey {
        TokenKey {
            label: self.label.clone(),
            id: self.id.clone(),
            algorithm: self.algorithm,
            public_key: self.public_key.clone(),
        }
    }

    fn ecdsa_signing(algorithm: DnsSecAlgorithm) -> Option<&'static signature::EcdsaSigningAlgorithm> {
        match algorithm {
            DnsSecAlgorithm::EcdsaP256Sha256 => Some(&signature::ECDSA_P256_SHA256_FIXED_SIGNING),
            DnsSecAlgorithm::EcdsaP384Sha384 => Some(&signature::ECDSA_P384_SHA384_FIXED_SIGNING),
            _ => None,
        }
    }

    fn generate(
        label: &str,
        id: &[u8],
        algorithm: DnsSecAlgorithm,
        rng: &SystemRandom,
    ) -> Result<Self, TokenError> {
        let failed = |e: ring::error::Unspecified| TokenError::Operation(e.to_string());
        let pkcs8 = if let Some(alg) = Self::ecdsa_signing(algorithm) {
            EcdsaKeyPair::generate_pkcs8(alg, rng).map_err(failed)?
        } else if algorithm == DnsSecAlgorithm::Ed25519 {
            Ed25519KeyPair::generate_pkcs8(rng).map_err(failed)?
        } else {
            return Err(TokenError::UnsupportedAlgorithm(algorithm.to_string()));
        };
        Self::from_pkcs8(label, id, algorithm, pkcs8.as_ref().to_vec(), rng)
    }

    fn from_pkcs8(
        label: &str,
        id: &[u8],
        algorithm: DnsSecAlgorithm,
        pkcs8: Vec<u8>,
        rng: &SystemRandom,
    ) -> Result<Self, TokenError> {
        let rejected = |e: ring::error::KeyRejected| TokenError::Storage(e.to_string());
        let public_key = if let Some(alg) = Self::ecdsa_signing(algorithm) {
            let pair = EcdsaKeyPair::from_pkcs8(alg, &pkcs8, rng).map_err(rejected)?;
            // DNSKEY carries x || y without the uncompressed point marker
            pair.public_key().as_ref()[1..].to_vec()
        } else if algorithm == DnsSecAlgorithm::Ed25519 {
            let pair = Ed25519KeyPair::from_pkcs8(&pkcs8).map_err(rejected)?;
            pair.public_key().as_ref().to_vec()
        } else {
            return Err(TokenError::UnsupportedAlgorithm(algorithm.to_string()));
        };

        Ok(Self {
            label: label.to_string(),
            id: id.to_vec(),
            algorithm,
            pkcs8,
            public_key,
        })
    }

    fn sign(&self, data: &[u8], rng: &SystemRandom) -> Result<Vec<u8>, TokenError> {
        if let Some(alg) = Self::ecdsa_signing(self.algorithm) {
            let pair = EcdsaKeyPair::from_pkcs8(alg, &self.pkcs8, rng)
                .map_err(|e| TokenError::Operation(e.to_string()))?;
            let sig = pair
                .sign(rng, data)
                .map_err(|e| TokenError::Operation(e.to_string()))?;
            return Ok(sig.as_ref().to_vec());
        }
        let pair = Ed25519KeyPair::from_pkcs8(&self.pkcs8)
            .map_err(|e| TokenError::Operation(e.to_string()))?;
        Ok(pair.sign(data).as_ref().to_vec())
    }
}

#[derive(Default)]
struct SoftState {
    keys: BTreeMap<Vec<u8>, SoftKey>,
}

/// In-memory or directory-backed software token
#[derive(Clone)]
pub struct SoftToken {
    state: Arc<Mutex<SoftState>>,
    dir: Option<PathBuf>,
    rng: SystemRandom,
    operational: Arc<AtomicBool>,
    lose_sessions: Arc<AtomicUsize>,
}

impl Default for SoftToken {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftToken {
    /// Token whose keys vanish with it
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SoftState::default())),
            dir: None,
            rng: SystemRandom::new(),
            operational: Arc::new(AtomicBool::new(true)),
            lose_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Token persisting its keys in `dir`, loading any already there
    pub fn open_dir(dir: impl Into<PathBuf>) -> Result<Self, TokenError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| TokenError::Storage(format!("{}: {}", dir.display(), e)))?;

        let token = Self {
            dir: Some(dir.clone()),
            ..Self::new()
        };

        let entries = fs::read_dir(&dir)
            .map_err(|e| TokenError::Storage(format!("{}: {}", dir.display(), e)))?;
        let mut state = token.state.lock();
        for entry in entries {
            let path = entry
                .map_err(|e| TokenError::Storage(e.to_string()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let key = token.load_key(&path)?;
            state.keys.insert(key.id.clone(), key);
        }
        debug!("Loaded {} soft token keys from {}", state.keys.len(), dir.display());
        drop(state);

        Ok(token)
    }

    fn load_key(&self, path: &Path) -> Result<SoftKey, TokenError> {
        let text = fs::read_to_string(path)
            .map_err(|e| TokenError::Storage(format!("{}: {}", path.display(), e)))?;
        let stored: StoredKey = serde_json::from_str(&text)
            .map_err(|e| TokenError::Storage(format!("{}: {}", path.display(), e)))?;
        let algorithm = DnsSecAlgorithm::from_u8(stored.algorithm)
            .ok_or_else(|| TokenError::UnsupportedAlgorithm(stored.algorithm.to_string()))?;
        let id = hex::decode(&stored.id)
            .map_err(|e| TokenError::Storage(format!("{}: {}", path.display(), e)))?;
        let pkcs8 = BASE64
            .decode(stored.pkcs8.as_bytes())
            .map_err(|e| TokenError::Storage(format!("{}: {}", path.display(), e)))?;
        SoftKey::from_pkcs8(&stored.label, &id, algorithm, pkcs8, &self.rng)
    }

    fn key_path(&self, id: &[u8]) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", hex::encode(id))))
    }

    fn persist(&self, key: &SoftKey) -> Result<(), TokenError> {
        let Some(path) = self.key_path(&key.id) else {
            return Ok(());
        };
        let stored = StoredKey {
            label: key.label.clone(),
            id: hex::encode(&key.id),
            algorithm: key.algorithm.to_u8(),
            pkcs8: BASE64.encode(&key.pkcs8),
        };
        let text = serde_json::to_string_pretty(&stored)
            .map_err(|e| TokenError::Storage(e.to_string()))?;
        let storage = |e: std::io::Error| TokenError::Storage(format!("{}: {}", path.display(), e));

        // Private key material: readable by the owner only, never partially written
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut file = NamedTempFile::new_in(dir).map_err(storage)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(storage)?;
        }
        file.write_all(text.as_bytes()).map_err(storage)?;
        file.as_file().sync_all().map_err(storage)?;
        file.persist(&path).map_err(|e| storage(e.error))?;
        Ok(())
    }

    /// Refuse new sessions, like an unplugged device
    pub fn set_operational(&self, operational: bool) {
        self.operational.store(operational, Ordering::Release);
    }

    /// Make the next `count` session operations fail with
    /// [`TokenError::SessionLost`]
    pub fn lose_sessions(&self, count: usize) {
        self.lose_sessions.store(count, Ordering::Release);
    }
}

impl Token for SoftToken {
    fn open_session(&self) -> Result<Box<dyn TokenSession>, TokenError> {
        if !self.operational.load(Ordering::Acquire) {
            return Err(TokenError::Unavailable("soft token not operational".to_string()));
        }
        Ok(Box::new(SoftSession {
            token: self.clone(),
        }))
    }

    fn describe(&self) -> String {
        match &self.dir {
            Some(dir) => format!("soft token at {}", dir.display()),
            None => "in-memory soft token".to_string(),
        }
    }
}

struct SoftSession {
    token: SoftToken,
}

impl SoftSession {
    fn check_session(&self) -> Result<(), TokenError> {
        let lost = self
            .token
            .lose_sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            warn!("Soft token dropping session");
            return Err(TokenError::SessionLost("session handle invalid".to_string()));
        }
        Ok(())
    }
}

impl TokenSession for SoftSession {
    fn find_keys(&mut self, label_prefix: &str) -> Result<Vec<TokenKey>, TokenError> {
        self.check_session()?;
        let state = self.token.state.lock();
        Ok(state
            .keys
            .values()
            .filter(|key| key.label.starts_with(label_prefix))
            .map(SoftKey::token_key)
            .collect())
    }

    fn generate_key_pair(
        &mut self,
        label: &str,
        id: &[u8],
        algorithm: DnsSecAlgorithm,
    ) -> Result<TokenKey, TokenError> {
        self.check_session()?;
        let key = SoftKey::generate(label, id, algorithm, &self.token.rng)?;
        self.token.persist(&key)?;
        let token_key = key.token_key();
        self.token.state.lock().keys.insert(key.id.clone(), key);
        debug!("Generated {} key pair {}", algorithm, label);
        Ok(token_key)
    }

    fn sign(
        &mut self,
        id: &[u8],
        algorithm: DnsSecAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, TokenError> {
        self.check_session()?;
        let key = self
            .token
            .state
            .lock()
            .keys
            .get(id)
            .cloned()
            .ok_or_else(|| TokenError::KeyNotFound(hex::encode(id)))?;
        if key.algorithm != algorithm {
            return Err(TokenError::Operation(format!(
                "key {} is {}, not {}",
                key.label, key.algorithm, algorithm
            )));
        }
        key.sign(data, &self.token.rng)
    }

    fn destroy_key(&mut self, id: &[u8]) -> Result<(), TokenError> {
        self.check_session()?;
        let removed = self.token.state.lock().keys.remove(id);
        if removed.is_none() {
            return Err(TokenError::KeyNotFound(hex::encode(id)));
        }
        if let Some(path) = self.token.key_path(id) {
            if path.exists() {
                fs::remove_file(&path)
                    .map_err(|e| TokenError::Storage(format!("{}: {}", path.display(), e)))?;
            }
        }
        Ok(())
    }
}
