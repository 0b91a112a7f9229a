use super::errors::TokenError;
use super::keys::TokenKey;
use crate::dnssec::DnsSecAlgorithm;

/// A key container that sessions can be opened against
pub trait Token: Send + Sync {
    /// Open and authenticate a new session
    fn open_session(&self) -> Result<Box<dyn TokenSession>, TokenError>;

    /// Name for logs
    fn describe(&self) -> String;
}

/// An open session with a token. Dropping it closes the session.
///
/// Implementations need not be thread safe; callers serialize access.
pub trait TokenSession: Send {
    /// Key pairs whose label starts with `label_prefix`
    fn find_keys(&mut self, label_prefix: &str) -> Result<Vec<TokenKey>, TokenError>;

    /// Create a key pair with the given label and object id
    fn generate_key_pair(
        &mut self,
        label: &str,
        id: &[u8],
        algorithm: DnsSecAlgorithm,
    ) -> Result<TokenKey, TokenError>;

    /// Sign `data` with the private key of object `id`. The token applies
    /// the algorithm's hash; the signature is returned in DNSSEC format.
    fn sign(
        &mut self,
        id: &[u8],
        algorithm: DnsSecAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, TokenError>;

    /// Destroy both halves of the key pair with object id `id`
    fn destroy_key(&mut self, id: &[u8]) -> Result<(), TokenError>;
}
