//! Entropy and hashing helpers for session identifiers and rotation tokens.
//!
//! Raw values only ever leave the process inside a cookie; storage sees the
//! SHA-256 digest. No salt is applied: every input carries 256 bits of
//! entropy, so a digest cannot be brute-forced back into a usable token.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest as _, Sha256};
use std::fmt;

use crate::Error;

/// Raw entropy per generated value, in bytes.
pub const TOKEN_BYTES: usize = 32;

/// Length of an encoded token or digest (unpadded base64url of 32 bytes).
pub const ENCODED_LEN: usize = 43;

/// One-way digest of a session id or token, as stored at rest.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HashDigest(String);

impl HashDigest {
    /// Wrap an already computed digest, e.g. one read back from storage.
    #[must_use]
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters of the digest, safe to put in logs.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Debug for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashDigest({}..)", self.short())
    }
}

impl fmt::Display for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Create a new random value for a session id or a rotation token.
///
/// Every call is an independent draw from the OS CSPRNG.
///
/// # Errors
/// Returns [`Error::Entropy`] if the OS random source fails.
pub fn generate_token() -> Result<String, Error> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.try_fill_bytes(&mut bytes).map_err(Error::Entropy)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a session id or token so raw values never touch storage.
#[must_use]
pub fn digest(value: &str) -> HashDigest {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    HashDigest(Base64UrlUnpadded::encode_string(&hasher.finalize()))
}
