//! HSM-backed key store.
//!
//! A [`KeyStore`] wraps a [`Token`] and hands out RAII [`Session`]s. Every
//! token call runs on the blocking thread pool under a timeout, and calls on
//! one token session are serialized. A lost session is reopened once before
//! the failure is reported. A call that times out leaves its token session
//! behind and the next call opens a new one.

pub mod errors;
pub mod keys;
#[cfg(feature = "pkcs11")]
pub mod pkcs11;
pub mod soft;
pub mod token;

pub use errors::{KeyStoreError, Result, TokenError};
pub use keys::{KeyHandle, KeyRole, TokenKey, key_id_algorithm};
#[cfg(feature = "pkcs11")]
pub use pkcs11::Pkcs11Token;
pub use soft::SoftToken;
pub use token::{Token, TokenSession};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, info, warn};

use crate::dnssec::DnsSecAlgorithm;

/// Key store constants
pub mod constants {
    use std::time::Duration;

    /// Default bound on a single token operation
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Key generations tried before giving up on a free key tag
    pub const MAX_KEYGEN_ATTEMPTS: usize = 8;

    /// Random bytes appended to the role prefix of a new object id
    pub const KEY_ID_RANDOM_LEN: usize = 8;
}

/// A token session shared by the calls of one [`Session`]
type SharedSession = Arc<Mutex<Box<dyn TokenSession>>>;

/// Ways a single token call can fail, before they are mapped onto the
/// operation's error kind.
enum CallError {
    Timeout(Duration),
    Token(TokenError),
}

/// Entry point to the keys of one token
#[derive(Clone)]
pub struct KeyStore {
    token: Arc<dyn Token>,
    timeout: Duration,
    create_keys: bool,
    /// Tags of keys destroyed through this store; new keys avoid them
    retired_tags: Arc<Mutex<HashSet<u16>>>,
}

impl KeyStore {
    pub fn new(token: Arc<dyn Token>) -> Self {
        Self {
            token,
            timeout: constants::DEFAULT_TIMEOUT,
            create_keys: true,
            retired_tags: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Bound every token call by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether missing keys may be generated
    pub fn with_create_keys(mut self, create_keys: bool) -> Self {
        self.create_keys = create_keys;
        self
    }

    /// Open an authenticated session. It is closed when the last clone of
    /// the returned [`Session`] is dropped.
    pub async fn open_session(&self) -> Result<Session> {
        let token = self.token.clone();
        let task = tokio::task::spawn_blocking(move || token.open_session());
        let handle = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                return Err(KeyStoreError::HsmConnection(format!(
                    "opening a session timed out after {:?}",
                    self.timeout
                )));
            }
            Ok(Err(e)) => return Err(KeyStoreError::HsmConnection(e.to_string())),
            Ok(Ok(result)) => result.map_err(|e| KeyStoreError::HsmConnection(e.to_string()))?,
        };

        debug!("Opened session on {}", self.token.describe());
        Ok(Session {
            inner: Arc::new(SessionInner {
                token: self.token.clone(),
                current: Mutex::new(Some(Arc::new(Mutex::new(handle)))),
                timeout: self.timeout,
                create_keys: self.create_keys,
                retired_tags: self.retired_tags.clone(),
                rng: SystemRandom::new(),
            }),
        })
    }
}

struct SessionInner {
    token: Arc<dyn Token>,
    /// Emptied when the session is lost or a call on it times out
    current: Mutex<Option<SharedSession>>,
    timeout: Duration,
    create_keys: bool,
    retired_tags: Arc<Mutex<HashSet<u16>>>,
    rng: SystemRandom,
}

impl SessionInner {
    /// The current token session, opening one if there is none
    fn current(&self) -> std::result::Result<SharedSession, TokenError> {
        if let Some(session) = self.current.lock().as_ref() {
            return Ok(session.clone());
        }
        let fresh = Arc::new(Mutex::new(self.token.open_session()?));
        debug!("Reopened session on {}", self.token.describe());
        Ok(self.current.lock().get_or_insert(fresh).clone())
    }

    /// Stop handing out `stale`. It closes once its last call returns.
    fn discard(&self, stale: &SharedSession) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|session| Arc::ptr_eq(session, stale)) {
            *current = None;
        }
    }

    /// Run `f` against the token session, reopening it once if it was lost.
    /// The session being used is kept in `in_use` for the caller.
    fn with_session<T, F>(
        &self,
        f: &F,
        in_use: &Mutex<Option<SharedSession>>,
    ) -> std::result::Result<T, TokenError>
    where
        F: Fn(&mut dyn TokenSession) -> std::result::Result<T, TokenError>,
    {
        let session = self.current()?;
        *in_use.lock() = Some(session.clone());
        let result = f(&mut **session.lock());

        match result {
            Err(TokenError::SessionLost(reason)) => {
                warn!("Token session lost ({}), reconnecting", reason);
                self.discard(&session);
                let fresh = self.current()?;
                *in_use.lock() = Some(fresh.clone());
                f(&mut **fresh.lock())
            }
            other => other,
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if self.current.lock().take().is_some() {
            debug!("Closed session on {}", self.token.describe());
        }
    }
}

/// An open session with the key store's token
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    async fn call<T, F>(&self, f: F) -> std::result::Result<T, CallError>
    where
        T: Send + 'static,
        F: Fn(&mut dyn TokenSession) -> std::result::Result<T, TokenError> + Send + 'static,
    {
        let inner = self.inner.clone();
        let timeout = inner.timeout;
        let in_use: Arc<Mutex<Option<SharedSession>>> = Arc::new(Mutex::new(None));
        let task = {
            let in_use = in_use.clone();
            tokio::task::spawn_blocking(move || inner.with_session(&f, &in_use))
        };
        match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                // The stuck call keeps its session; later calls get a new one
                if let Some(stale) = in_use.lock().take() {
                    warn!("Token call timed out after {:?}, abandoning its session", timeout);
                    self.inner.discard(&stale);
                }
                Err(CallError::Timeout(timeout))
            }
            Ok(Err(join)) => Err(CallError::Token(TokenError::Operation(join.to_string()))),
            Ok(Ok(result)) => result.map_err(CallError::Token),
        }
    }

    /// Map a failed management call: connectivity problems are connection
    /// errors, anything else is a provisioning error.
    fn provision_error(e: CallError) -> KeyStoreError {
        match e {
            CallError::Timeout(after) => {
                KeyStoreError::HsmConnection(format!("token call timed out after {:?}", after))
            }
            CallError::Token(
                e @ (TokenError::SessionLost(_) | TokenError::Unavailable(_) | TokenError::Login(_)),
            ) => KeyStoreError::HsmConnection(e.to_string()),
            CallError::Token(e) => KeyStoreError::KeyProvision(e.to_string()),
        }
    }

    async fn all_keys(&self) -> Result<Vec<TokenKey>> {
        self.call(|s| s.find_keys(""))
            .await
            .map_err(Self::provision_error)
    }

    /// Find the key pair labelled `label`, creating it when absent and
    /// creation is allowed.
    pub async fn find_or_create_key(
        &self,
        role: KeyRole,
        algorithm: DnsSecAlgorithm,
        label: &str,
    ) -> Result<KeyHandle> {
        let existing = self.all_keys().await?;

        let mut labelled = existing.iter().filter(|k| k.label == label);
        if let Some(key) = labelled.next() {
            if labelled.next().is_some() {
                warn!("Several key pairs are labelled {}, using the first", label);
            }
            let key = if key.algorithm == algorithm {
                key.clone()
            } else if Self::unrecorded_rsa_variant(key, algorithm) {
                // Same RSA key material, the id just does not say which variant
                TokenKey {
                    algorithm,
                    ..key.clone()
                }
            } else {
                return Err(KeyStoreError::KeyProvision(format!(
                    "key {} is {}, expected {}",
                    label, key.algorithm, algorithm
                )));
            };
            let handle = KeyHandle::new(role, key);
            debug!("Found {}", handle);
            return Ok(handle);
        }

        if !self.inner.create_keys {
            return Err(KeyStoreError::KeyProvision(format!(
                "no key labelled {} and key creation is disabled",
                label
            )));
        }

        // Tags in use under either flag value, plus the ones retired here
        let mut taken: HashSet<u16> = self.inner.retired_tags.lock().clone();
        for key in &existing {
            for flags in [KeyRole::Zsk.flags(), KeyRole::Ksk.flags()] {
                taken.insert(crate::dnssec::calculate_key_tag(
                    flags,
                    3,
                    key.algorithm.to_u8(),
                    &key.public_key,
                ));
            }
        }

        for attempt in 1..=constants::MAX_KEYGEN_ATTEMPTS {
            let id = self.new_key_id(role, algorithm)?;
            let owned_label = label.to_string();
            let owned_id = id.clone();
            let key = self
                .call(move |s| s.generate_key_pair(&owned_label, &owned_id, algorithm))
                .await
                .map_err(Self::provision_error)?;

            let handle = KeyHandle::new(role, key);
            if !taken.contains(&handle.key_tag) {
                info!("Created {}", handle);
                return Ok(handle);
            }

            warn!(
                "New key {} has colliding tag {} (attempt {}), regenerating",
                label, handle.key_tag, attempt
            );
            self.call(move |s| s.destroy_key(&id))
                .await
                .map_err(Self::provision_error)?;
        }

        Err(KeyStoreError::KeyProvision(format!(
            "could not create key {} with an unused key tag",
            label
        )))
    }

    /// An RSA key whose object id does not record its algorithm serves any
    /// RSA variant
    fn unrecorded_rsa_variant(key: &TokenKey, algorithm: DnsSecAlgorithm) -> bool {
        key.algorithm.is_rsa() && algorithm.is_rsa() && key_id_algorithm(&key.id).is_none()
    }

    fn new_key_id(&self, role: KeyRole, algorithm: DnsSecAlgorithm) -> Result<Vec<u8>> {
        let mut random = [0u8; constants::KEY_ID_RANDOM_LEN];
        self.inner
            .rng
            .fill(&mut random)
            .map_err(|_| KeyStoreError::KeyProvision("random source failed".to_string()))?;
        Ok(keys::new_key_id(role, algorithm, &hex::encode(random)))
    }

    /// Sign `data` with the private half of `key`. The signature comes back
    /// in DNSSEC wire format.
    pub async fn sign(&self, key: &KeyHandle, data: Vec<u8>) -> Result<Vec<u8>> {
        let id = key.id.clone();
        let algorithm = key.algorithm;
        self.call(move |s| s.sign(&id, algorithm, &data))
            .await
            .map_err(|e| match e {
                CallError::Timeout(after) => {
                    KeyStoreError::Signing(format!("signing timed out after {:?}", after))
                }
                CallError::Token(e) => KeyStoreError::Signing(e.to_string()),
            })
    }

    /// Keys on the token whose object id records a role, optionally only
    /// those of `role`.
    pub async fn list_keys(&self, role: Option<KeyRole>) -> Result<Vec<KeyHandle>> {
        let keys = self.all_keys().await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| {
                let key_role = KeyRole::from_key_id(&key.id)?;
                if role.is_some_and(|r| r != key_role) {
                    return None;
                }
                Some(KeyHandle::new(key_role, key))
            })
            .collect())
    }

    /// Destroy every key pair whose label starts with `label_prefix`.
    /// Irreversible; callers must obtain confirmation first.
    pub async fn reset_keys(&self, label_prefix: &str) -> Result<usize> {
        let prefix = label_prefix.to_string();
        let keys = self
            .call(move |s| s.find_keys(&prefix))
            .await
            .map_err(Self::provision_error)?;

        let mut destroyed = 0;
        for key in keys {
            {
                let mut retired = self.inner.retired_tags.lock();
                for flags in [KeyRole::Zsk.flags(), KeyRole::Ksk.flags()] {
                    retired.insert(crate::dnssec::calculate_key_tag(
                        flags,
                        3,
                        key.algorithm.to_u8(),
                        &key.public_key,
                    ));
                }
            }

            let id = key.id.clone();
            self.call(move |s| s.destroy_key(&id))
                .await
                .map_err(Self::provision_error)?;
            info!("Destroyed key {}", key.label);
            destroyed += 1;
        }

        Ok(destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn store() -> (SoftToken, KeyStore) {
        let token = SoftToken::new();
        let store = KeyStore::new(Arc::new(token.clone()));
        (token, store)
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let (_, store) = store();
        let session = store.open_session().await.unwrap();
        let first = session
            .find_or_create_key(KeyRole::Zsk, DnsSecAlgorithm::EcdsaP256Sha256, "zsk-a")
            .await
            .unwrap();
        let again = session
            .find_or_create_key(KeyRole::Zsk, DnsSecAlgorithm::EcdsaP256Sha256, "zsk-a")
            .await
            .unwrap();
        assert_eq!(first, again);
        assert!(first.id.starts_with(b"zsk-"));
    }

    #[tokio::test]
    async fn test_algorithm_mismatch_is_rejected() {
        let (_, store) = store();
        let session = store.open_session().await.unwrap();
        session
            .find_or_create_key(KeyRole::Zsk, DnsSecAlgorithm::Ed25519, "zsk-a")
            .await
            .unwrap();
        let err = session
            .find_or_create_key(KeyRole::Zsk, DnsSecAlgorithm::EcdsaP256Sha256, "zsk-a")
            .await
            .unwrap_err();
        assert!(matches!(err, KeyStoreError::KeyProvision(_)));
    }

    #[tokio::test]
    async fn test_creation_can_be_disabled() {
        let (_, store) = store();
        let store = store.with_create_keys(false);
        let session = store.open_session().await.unwrap();
        let err = session
            .find_or_create_key(KeyRole::Ksk, DnsSecAlgorithm::Ed25519, "ksk-a")
            .await
            .unwrap_err();
        assert!(matches!(err, KeyStoreError::KeyProvision(_)));
    }

    #[tokio::test]
    async fn test_list_keys_by_role() {
        let (_, store) = store();
        let session = store.open_session().await.unwrap();
        session
            .find_or_create_key(KeyRole::Zsk, DnsSecAlgorithm::Ed25519, "zsk-a")
            .await
            .unwrap();
        session
            .find_or_create_key(KeyRole::Ksk, DnsSecAlgorithm::Ed25519, "ksk-a")
            .await
            .unwrap();

        assert_eq!(session.list_keys(None).await.unwrap().len(), 2);
        let ksks = session.list_keys(Some(KeyRole::Ksk)).await.unwrap();
        assert_eq!(ksks.len(), 1);
        assert_eq!(ksks[0].label, "ksk-a");
        assert_eq!(ksks[0].flags, 257);
    }

    #[tokio::test]
    async fn test_reset_then_create_changes_tag() {
        let (_, store) = store();
        let session = store.open_session().await.unwrap();
        let old = session
            .find_or_create_key(KeyRole::Zsk, DnsSecAlgorithm::EcdsaP256Sha256, "zsk-a")
            .await
            .unwrap();

        assert_eq!(session.reset_keys("zsk-").await.unwrap(), 1);
        assert!(session.list_keys(None).await.unwrap().is_empty());

        let new = session
            .find_or_create_key(KeyRole::Zsk, DnsSecAlgorithm::EcdsaP256Sha256, "zsk-a")
            .await
            .unwrap();
        assert_ne!(old.key_tag, new.key_tag);
    }

    #[tokio::test]
    async fn test_lost_session_is_retried_once() {
        let (token, store) = store();
        let session = store.open_session().await.unwrap();
        let key = session
            .find_or_create_key(KeyRole::Zsk, DnsSecAlgorithm::Ed25519, "zsk-a")
            .await
            .unwrap();

        token.lose_sessions(1);
        assert!(session.sign(&key, b"data".to_vec()).await.is_ok());

        token.lose_sessions(2);
        let err = session.sign(&key, b"data".to_vec()).await.unwrap_err();
        assert!(matches!(err, KeyStoreError::Signing(_)));
    }

    #[tokio::test]
    async fn test_unavailable_token() {
        let (token, store) = store();
        token.set_operational(false);
        let err = store.open_session().await.unwrap_err();
        assert!(matches!(err, KeyStoreError::HsmConnection(_)));
    }

    /// Token with fixed keys whose signing behavior is set by the test.
    /// Counts opened sessions and signing calls.
    #[derive(Clone, Default)]
    struct ScriptedToken {
        keys: Vec<TokenKey>,
        /// The first signing call sleeps this long
        first_sign_delay: Option<Duration>,
        sign_error: Option<TokenError>,
        opened: Arc<AtomicUsize>,
        sign_calls: Arc<AtomicUsize>,
    }

    struct ScriptedSession(ScriptedToken);

    impl Token for ScriptedToken {
        fn open_session(&self) -> std::result::Result<Box<dyn TokenSession>, TokenError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSession(self.clone())))
        }

        fn describe(&self) -> String {
            "scripted token".to_string()
        }
    }

    impl TokenSession for ScriptedSession {
        fn find_keys(&mut self, label_prefix: &str) -> std::result::Result<Vec<TokenKey>, TokenError> {
            Ok(self
                .0
                .keys
                .iter()
                .filter(|key| key.label.starts_with(label_prefix))
                .cloned()
                .collect())
        }

        fn generate_key_pair(
            &mut self,
            _label: &str,
            _id: &[u8],
            algorithm: DnsSecAlgorithm,
        ) -> std::result::Result<TokenKey, TokenError> {
            Err(TokenError::UnsupportedAlgorithm(algorithm.to_string()))
        }

        fn sign(
            &mut self,
            _id: &[u8],
            _algorithm: DnsSecAlgorithm,
            _data: &[u8],
        ) -> std::result::Result<Vec<u8>, TokenError> {
            let call = self.0.sign_calls.fetch_add(1, Ordering::SeqCst);
            if let (0, Some(delay)) = (call, self.0.first_sign_delay) {
                std::thread::sleep(delay);
            }
            match &self.0.sign_error {
                Some(e) => Err(e.clone()),
                None => Ok(vec![0; 64]),
            }
        }

        fn destroy_key(&mut self, _id: &[u8]) -> std::result::Result<(), TokenError> {
            Ok(())
        }
    }

    fn scripted_key() -> KeyHandle {
        KeyHandle::new(
            KeyRole::Zsk,
            TokenKey {
                label: "zsk-a".to_string(),
                id: b"zsk-13-01".to_vec(),
                algorithm: DnsSecAlgorithm::EcdsaP256Sha256,
                public_key: vec![1; 64],
            },
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timed_out_call_gives_up_its_session() {
        let token = ScriptedToken {
            first_sign_delay: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let store = KeyStore::new(Arc::new(token.clone())).with_timeout(Duration::from_millis(100));
        let session = store.open_session().await.unwrap();
        let key = scripted_key();

        let started = Instant::now();
        let err = session.sign(&key, b"data".to_vec()).await.unwrap_err();
        assert!(matches!(err, KeyStoreError::Signing(_)));
        assert!(started.elapsed() < Duration::from_secs(1));

        // The stuck call still holds the old session; this one opens a new
        // session instead of waiting
        let started = Instant::now();
        assert_eq!(session.sign(&key, b"data".to_vec()).await.unwrap().len(), 64);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(token.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_token_failure_is_not_retried() {
        let token = ScriptedToken {
            sign_error: Some(TokenError::Operation("CKR_FUNCTION_FAILED".to_string())),
            ..Default::default()
        };
        let session = KeyStore::new(Arc::new(token.clone()))
            .open_session()
            .await
            .unwrap();
        let err = session.sign(&scripted_key(), b"data".to_vec()).await.unwrap_err();
        assert!(matches!(err, KeyStoreError::Signing(_)));
        assert_eq!(token.sign_calls.load(Ordering::SeqCst), 1);
        assert_eq!(token.opened.load(Ordering::SeqCst), 1);

        // A lost session is reopened and the call made once more
        let token = ScriptedToken {
            sign_error: Some(TokenError::SessionLost("CKR_SESSION_CLOSED".to_string())),
            ..Default::default()
        };
        let session = KeyStore::new(Arc::new(token.clone()))
            .open_session()
            .await
            .unwrap();
        assert!(session.sign(&scripted_key(), b"data".to_vec()).await.is_err());
        assert_eq!(token.sign_calls.load(Ordering::SeqCst), 2);
        assert_eq!(token.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rsa_variant_comes_from_request() {
        let rsa_key = |id: &[u8]| TokenKey {
            label: "zsk-rsa".to_string(),
            id: id.to_vec(),
            algorithm: DnsSecAlgorithm::RsaSha256,
            public_key: vec![3, 1, 0, 1, 0xc3, 0x5a, 0x99, 0x10],
        };

        // Created elsewhere: the id does not record the variant
        let token = ScriptedToken {
            keys: vec![rsa_key(b"zsk-legacy")],
            ..Default::default()
        };
        let session = KeyStore::new(Arc::new(token)).open_session().await.unwrap();
        let handle = session
            .find_or_create_key(KeyRole::Zsk, DnsSecAlgorithm::RsaSha512, "zsk-rsa")
            .await
            .unwrap();
        assert_eq!(handle.algorithm, DnsSecAlgorithm::RsaSha512);
        assert_eq!(handle.dnskey().algorithm, 10);
        assert_eq!(handle.key_tag, handle.dnskey().key_tag());

        // The id says RSASHA256, so asking for RSASHA512 is a mismatch
        let token = ScriptedToken {
            keys: vec![rsa_key(b"zsk-8-00ff")],
            ..Default::default()
        };
        let session = KeyStore::new(Arc::new(token)).open_session().await.unwrap();
        let err = session
            .find_or_create_key(KeyRole::Zsk, DnsSecAlgorithm::RsaSha512, "zsk-rsa")
            .await
            .unwrap_err();
        assert!(matches!(err, KeyStoreError::KeyProvision(_)));
    }
}
