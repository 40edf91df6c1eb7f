//! Cookie value codec: `{session_id}:{token}`.
//!
//! Only structure is validated here. Whether the pair means anything is the
//! state machine's call.

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::token::{digest, HashDigest};

/// Separator between the session id and the token. Never part of the
/// base64url alphabet used by [`crate::token::generate_token`].
pub const DELIMITER: char = ':';

/// Why a cookie value could not be split into a credential.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    #[error("cookie value has no delimiter")]
    MissingDelimiter,
    #[error("cookie value has more than one delimiter")]
    ExtraDelimiter,
    #[error("cookie value has an empty session id")]
    EmptySessionId,
    #[error("cookie value has an empty token")]
    EmptyToken,
}

/// A decoded cookie, valid for a single request.
#[derive(Debug, Clone)]
pub struct Credential {
    session_id: SecretString,
    token: SecretString,
    session_id_hash: HashDigest,
}

impl Credential {
    #[must_use]
    pub fn new(session_id: String, token: String) -> Self {
        let session_id_hash = digest(&session_id);
        Self {
            session_id: SecretString::from(session_id),
            token: SecretString::from(token),
            session_id_hash,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        self.session_id.expose_secret()
    }

    #[must_use]
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    /// Storage key of the session this credential claims.
    #[must_use]
    pub fn session_id_hash(&self) -> &HashDigest {
        &self.session_id_hash
    }

    #[must_use]
    pub fn token_hash(&self) -> HashDigest {
        digest(self.token())
    }
}

/// Join a session id and token into a cookie value.
#[must_use]
pub fn encode(session_id: &str, token: &str) -> String {
    format!("{session_id}{DELIMITER}{token}")
}

/// Split a cookie value into a [`Credential`].
///
/// # Errors
/// Returns [`Malformed`] unless the value is exactly two non-empty parts
/// around a single delimiter.
pub fn decode(cookie_value: &str) -> Result<Credential, Malformed> {
    let mut parts = cookie_value.split(DELIMITER);
    let session_id = parts.next().unwrap_or_default();
    let Some(token) = parts.next() else {
        return Err(Malformed::MissingDelimiter);
    };
    if parts.next().is_some() {
        return Err(Malformed::ExtraDelimiter);
    }
    if session_id.is_empty() {
        return Err(Malformed::EmptySessionId);
    }
    if token.is_empty() {
        return Err(Malformed::EmptyToken);
    }
    Ok(Credential::new(session_id.to_string(), token.to_string()))
}
