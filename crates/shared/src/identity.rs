//! Pseudonymous identity tokens
//!
//! Raw client addresses are turned into salted HMAC-SHA-256 tokens. The same
//! hasher value is used at ingest, when matching operator filters, and by the
//! by-address purge fallback, so tokens from all three paths compare equal.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Salted one-way hasher for client addresses
#[derive(Clone)]
pub struct IdentityHasher {
    salt: Vec<u8>,
}

impl std::fmt::Debug for IdentityHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityHasher").finish_non_exhaustive()
    }
}

impl IdentityHasher {
    pub fn new(salt: &str) -> Self {
        Self {
            salt: salt.as_bytes().to_vec(),
        }
    }

    /// Hash a raw address. Missing or blank input yields `None`.
    pub fn hash(&self, address: Option<&str>) -> Option<String> {
        let address = address.map(str::trim).filter(|a| !a.is_empty())?;
        // HMAC accepts keys of any length, so this cannot fail in practice
        let mut mac = HmacSha256::new_from_slice(&self.salt).ok()?;
        mac.update(address.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Hash every non-blank address in a list
    pub fn hash_all<'a, I>(&self, addresses: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        addresses
            .into_iter()
            .filter_map(|a| self.hash(Some(a)))
            .collect()
    }
}
