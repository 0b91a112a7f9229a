//! PKCS#11 token backend built on `cryptoki`.

use std::path::Path;

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CryptokiError, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use ring::digest;
use tracing::{debug, info};

use super::errors::TokenError;
use super::keys::{TokenKey, key_id_algorithm};
use super::token::{Token, TokenSession};
use crate::dnssec::DnsSecAlgorithm;

/// DER encoded curve OIDs for CKA_EC_PARAMS
const P256_PARAMS: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
const P384_PARAMS: &[u8] = &[0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x22];
const ED25519_PARAMS: &[u8] = &[0x06, 0x03, 0x2b, 0x65, 0x70];

const RSA_MODULUS_BITS: u64 = 2048;
const RSA_PUBLIC_EXPONENT: &[u8] = &[0x01, 0x00, 0x01];

fn token_error(e: CryptokiError) -> TokenError {
    match e {
        CryptokiError::Pkcs11(
            RvError::SessionHandleInvalid
            | RvError::SessionClosed
            | RvError::DeviceRemoved
            | RvError::TokenNotPresent,
            _,
        ) => TokenError::SessionLost(e.to_string()),
        CryptokiError::Pkcs11(RvError::PinIncorrect | RvError::PinLocked, _) => {
            TokenError::Login(e.to_string())
        }
        other => TokenError::Operation(other.to_string()),
    }
}

/// Token reached through a PKCS#11 module
pub struct Pkcs11Token {
    ctx: Pkcs11,
    slot: Slot,
    pin: String,
    description: String,
}

impl Pkcs11Token {
    /// Load the module, initialize it and pick the slot with id `slot_id`
    pub fn open(library: &Path, slot_id: u64, pin: &str) -> Result<Self, TokenError> {
        let ctx = Pkcs11::new(library)
            .map_err(|e| TokenError::Unavailable(format!("{}: {}", library.display(), e)))?;
        ctx.initialize(CInitializeArgs::OsThreads)
            .map_err(|e| TokenError::Unavailable(e.to_string()))?;

        let slot = ctx
            .get_slots_with_token()
            .map_err(|e| TokenError::Unavailable(e.to_string()))?
            .into_iter()
            .find(|slot| slot.id() == slot_id)
            .ok_or_else(|| {
                TokenError::Unavailable(format!("no token present in slot {}", slot_id))
            })?;

        info!("Using PKCS#11 module {} slot {}", library.display(), slot_id);
        Ok(Self {
            ctx,
            slot,
            pin: pin.to_string(),
            description: format!("PKCS#11 {} slot {}", library.display(), slot_id),
        })
    }
}

impl Token for Pkcs11Token {
    fn open_session(&self) -> Result<Box<dyn TokenSession>, TokenError> {
        let session = self
            .ctx
            .open_rw_session(self.slot)
            .map_err(|e| TokenError::Unavailable(e.to_string()))?;
        session
            .login(UserType::User, Some(&AuthPin::new(self.pin.clone())))
            .map_err(|e| TokenError::Login(e.to_string()))?;
        debug!("Opened session on {}", self.description);
        Ok(Box::new(Pkcs11Session { session }))
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// A logged-in session; cryptoki closes it on drop
struct Pkcs11Session {
    session: Session,
}

impl Pkcs11Session {
    fn objects(&self, class: ObjectClass, id: Option<&[u8]>) -> Result<Vec<ObjectHandle>, TokenError> {
        let mut template = vec![Attribute::Class(class)];
        if let Some(id) = id {
            template.push(Attribute::Id(id.to_vec()));
        }
        self.session.find_objects(&template).map_err(token_error)
    }

    /// Read a public key object into a `TokenKey`, skipping key types the
    /// signer cannot use.
    fn read_public_key(&self, handle: ObjectHandle) -> Result<Option<TokenKey>, TokenError> {
        let attributes = self
            .session
            .get_attributes(
                handle,
                &[
                    AttributeType::Label,
                    AttributeType::Id,
                    AttributeType::KeyType,
                    AttributeType::EcParams,
                    AttributeType::EcPoint,
                    AttributeType::Modulus,
                    AttributeType::PublicExponent,
                ],
            )
            .map_err(token_error)?;

        let mut label = String::new();
        let mut id = Vec::new();
        let mut key_type = None;
        let mut ec_params = Vec::new();
        let mut ec_point = Vec::new();
        let mut modulus = Vec::new();
        let mut exponent = Vec::new();
        for attribute in attributes {
            match attribute {
                Attribute::Label(value) => label = String::from_utf8_lossy(&value).into_owned(),
                Attribute::Id(value) => id = value,
                Attribute::KeyType(value) => key_type = Some(value),
                Attribute::EcParams(value) => ec_params = value,
                Attribute::EcPoint(value) => ec_point = value,
                Attribute::Modulus(value) => modulus = value,
                Attribute::PublicExponent(value) => exponent = value,
                _ => {}
            }
        }

        let (algorithm, public_key) = match key_type {
            Some(KeyType::EC) if ec_params == P256_PARAMS => (
                DnsSecAlgorithm::EcdsaP256Sha256,
                ec_point_to_dnskey(&ec_point, 64)?,
            ),
            Some(KeyType::EC) if ec_params == P384_PARAMS => (
                DnsSecAlgorithm::EcdsaP384Sha384,
                ec_point_to_dnskey(&ec_point, 96)?,
            ),
            Some(KeyType::EC_EDWARDS) => (
                DnsSecAlgorithm::Ed25519,
                ec_point_to_dnskey(&ec_point, 32)?,
            ),
            // The key material does not say which RSA variant it is for
            Some(KeyType::RSA) => (
                key_id_algorithm(&id)
                    .filter(DnsSecAlgorithm::is_rsa)
                    .unwrap_or(DnsSecAlgorithm::RsaSha256),
                rsa_to_dnskey(&exponent, &modulus),
            ),
            _ => {
                debug!("Skipping unusable key object {}", label);
                return Ok(None);
            }
        };

        Ok(Some(TokenKey {
            label,
            id,
            algorithm,
            public_key,
        }))
    }
}

/// Strip the DER OCTET STRING wrapper and the uncompressed point marker
fn ec_point_to_dnskey(point: &[u8], len: usize) -> Result<Vec<u8>, TokenError> {
    let unmarked = |p: &[u8]| -> Option<Vec<u8>> {
        match p {
            [0x04, rest @ ..] if rest.len() == len => Some(rest.to_vec()),
            _ if p.len() == len && len == 32 => Some(p.to_vec()),
            _ => None,
        }
    };

    // Some modules return the bare point instead of the DER wrapped one
    if let Some(key) = unmarked(point) {
        return Ok(key);
    }
    let raw = match point {
        [0x04, n, rest @ ..] if usize::from(*n) == rest.len() => rest,
        [0x04, 0x81, n, rest @ ..] if usize::from(*n) == rest.len() => rest,
        other => other,
    };
    if let Some(key) = unmarked(raw) {
        return Ok(key);
    }
    if raw.len() != len {
        return Err(TokenError::Operation(format!(
            "unexpected EC point length {}",
            raw.len()
        )));
    }
    Ok(raw.to_vec())
}

/// RFC 3110 public key: exponent length, exponent, modulus
fn rsa_to_dnskey(exponent: &[u8], modulus: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + exponent.len() + modulus.len());
    if exponent.len() <= 255 {
        out.push(exponent.len() as u8);
    } else {
        out.push(0);
        out.extend_from_slice(&(exponent.len() as u16).to_be_bytes());
    }
    out.extend_from_slice(exponent);
    out.extend_from_slice(modulus);
    out
}

impl TokenSession for Pkcs11Session {
    fn find_keys(&mut self, label_prefix: &str) -> Result<Vec<TokenKey>, TokenError> {
        let mut keys = Vec::new();
        for handle in self.objects(ObjectClass::PUBLIC_KEY, None)? {
            if let Some(key) = self.read_public_key(handle)? {
                if key.label.starts_with(label_prefix) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    fn generate_key_pair(
        &mut self,
        label: &str,
        id: &[u8],
        algorithm: DnsSecAlgorithm,
    ) -> Result<TokenKey, TokenError> {
        let common = vec![
            Attribute::Token(true),
            Attribute::Label(label.as_bytes().to_vec()),
            Attribute::Id(id.to_vec()),
        ];
        let mut public = common.clone();
        public.push(Attribute::Verify(true));
        let mut private = common;
        private.extend([
            Attribute::Sign(true),
            Attribute::Private(true),
            Attribute::Sensitive(true),
            Attribute::Extractable(false),
        ]);

        let mechanism = match algorithm {
            DnsSecAlgorithm::EcdsaP256Sha256 => {
                public.push(Attribute::EcParams(P256_PARAMS.to_vec()));
                Mechanism::EccKeyPairGen
            }
            DnsSecAlgorithm::EcdsaP384Sha384 => {
                public.push(Attribute::EcParams(P384_PARAMS.to_vec()));
                Mechanism::EccKeyPairGen
            }
            DnsSecAlgorithm::Ed25519 => {
                public.push(Attribute::EcParams(ED25519_PARAMS.to_vec()));
                Mechanism::EccEdwardsKeyPairGen
            }
            DnsSecAlgorithm::RsaSha256 | DnsSecAlgorithm::RsaSha512 => {
                public.push(Attribute::ModulusBits(RSA_MODULUS_BITS.into()));
                public.push(Attribute::PublicExponent(RSA_PUBLIC_EXPONENT.to_vec()));
                Mechanism::RsaPkcsKeyPairGen
            }
            other => return Err(TokenError::UnsupportedAlgorithm(other.to_string())),
        };

        let (public_handle, _) = self
            .session
            .generate_key_pair(&mechanism, &public, &private)
            .map_err(token_error)?;

        let mut key = self
            .read_public_key(public_handle)?
            .ok_or_else(|| TokenError::Operation("generated key is unreadable".to_string()))?;
        // Ids not made by the key store do not record the RSA variant
        key.algorithm = algorithm;
        Ok(key)
    }

    fn sign(
        &mut self,
        id: &[u8],
        algorithm: DnsSecAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, TokenError> {
        let handle = self
            .objects(ObjectClass::PRIVATE_KEY, Some(id))?
            .into_iter()
            .next()
            .ok_or_else(|| TokenError::KeyNotFound(hex::encode(id)))?;

        match algorithm {
            // CKM_ECDSA signs a precomputed hash and returns r || s
            DnsSecAlgorithm::EcdsaP256Sha256 | DnsSecAlgorithm::EcdsaP384Sha384 => {
                let hash_alg = algorithm
                    .message_digest()
                    .ok_or_else(|| TokenError::UnsupportedAlgorithm(algorithm.to_string()))?;
                let hash = digest::digest(hash_alg, data);
                self.session
                    .sign(&Mechanism::Ecdsa, handle, hash.as_ref())
                    .map_err(token_error)
            }
            DnsSecAlgorithm::Ed25519 => self
                .session
                .sign(&Mechanism::Eddsa, handle, data)
                .map_err(token_error),
            DnsSecAlgorithm::RsaSha256 => self
                .session
                .sign(&Mechanism::Sha256RsaPkcs, handle, data)
                .map_err(token_error),
            DnsSecAlgorithm::RsaSha512 => self
                .session
                .sign(&Mechanism::Sha512RsaPkcs, handle, data)
                .map_err(token_error),
            other => Err(TokenError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    fn destroy_key(&mut self, id: &[u8]) -> Result<(), TokenError> {
        let mut handles = self.objects(ObjectClass::PRIVATE_KEY, Some(id))?;
        handles.extend(self.objects(ObjectClass::PUBLIC_KEY, Some(id))?);
        if handles.is_empty() {
            return Err(TokenError::KeyNotFound(hex::encode(id)));
        }
        for handle in handles {
            self.session.destroy_object(handle).map_err(token_error)?;
        }
        Ok(())
    }
}
