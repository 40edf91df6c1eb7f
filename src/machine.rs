//! Token rotation state machine.
//!
//! Everything here is pure: given a credential, the stored record and the
//! current instant, decide the session state, the single store action to
//! apply and the cookie to send back. The caller applies the action exactly
//! once; nothing is re-read after the decision.
//!
//! Checks run in a fixed order and the first match wins:
//!
//! 1. no record: `NotFound`
//! 2. token in neither slot: `Forked` (record deleted)
//! 3. session past expiry: `Expired` (record deleted)
//! 4. token in the previous slot: `Active`, untouched
//! 5. latest token, not yet due: `Active`, untouched
//! 6. latest token, due: rotate
//!
//! Forking is checked before expiry so an expired session presented with a
//! foreign token is still reported as the stronger signal.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::fmt;

use crate::config::SessionConfig;
use crate::credential::{self, Credential};
use crate::directive::CookieDirective;
use crate::record::{SessionRecord, SessionUpdate, Slot};
use crate::token::{digest, generate_token, HashDigest};
use crate::Error;

/// Classification of a request's session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    CookieMissing,
    CookieMalformed,
    NotFound,
    /// A token outside both slots was presented; the session was stolen and
    /// used independently. The record is gone.
    Forked,
    Expired,
    Active {
        rotated: bool,
    },
}

impl SessionState {
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active { .. })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CookieMissing => "cookie_missing",
            Self::CookieMalformed => "cookie_malformed",
            Self::NotFound => "not_found",
            Self::Forked => "forked",
            Self::Expired => "expired",
            Self::Active { rotated: false } => "active",
            Self::Active { rotated: true } => "rotated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store mutation decided by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    None,
    Create(SessionRecord),
    Replace {
        session_id_hash: HashDigest,
        update: SessionUpdate,
    },
    Delete(HashDigest),
}

/// Result of evaluating one request.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: SessionState,
    pub action: Action,
    /// `None` means the client's cookie is fine as it is.
    pub cookie: Option<CookieDirective>,
    /// The record's payload, only for `Active`.
    pub application_data: Option<Value>,
}

impl Transition {
    fn terminal(state: SessionState, action: Action, config: &SessionConfig) -> Self {
        Self {
            state,
            action,
            cookie: Some(config.logout_cookie()),
            application_data: None,
        }
    }

    fn untouched(record: SessionRecord) -> Self {
        Self {
            state: SessionState::Active { rotated: false },
            action: Action::None,
            cookie: None,
            application_data: Some(record.application_data),
        }
    }
}

/// A new session ready to be stored.
#[derive(Debug, Clone)]
pub struct Login {
    pub session_id_hash: HashDigest,
    pub cookie: CookieDirective,
    /// Always [`Action::Create`].
    pub action: Action,
}

/// No cookie was sent. Nothing to clear either.
#[must_use]
pub fn cookie_missing() -> Transition {
    Transition {
        state: SessionState::CookieMissing,
        action: Action::None,
        cookie: None,
        application_data: None,
    }
}

/// The cookie could not be decoded; tell the browser to drop it.
#[must_use]
pub fn cookie_malformed(config: &SessionConfig) -> Transition {
    Transition::terminal(SessionState::CookieMalformed, Action::None, config)
}

/// Evaluate a presented credential against the stored record.
///
/// # Errors
/// Returns [`Error::Entropy`] if a rotation is due and no new token can be
/// generated, or [`Error::TtlOverflow`] if a configured TTL pushes the new
/// expiry out of range.
pub fn consume(
    credential: &Credential,
    record: Option<SessionRecord>,
    now: DateTime<Utc>,
    config: &SessionConfig,
) -> Result<Transition, Error> {
    // Absence covers natural cleanup, admin deletion and never-existed alike.
    let Some(record) = record else {
        return Ok(Transition::terminal(
            SessionState::NotFound,
            Action::None,
            config,
        ));
    };

    let token_hash = credential.token_hash();
    let Some(slot) = record.slot_of(&token_hash) else {
        return Ok(Transition::terminal(
            SessionState::Forked,
            Action::Delete(record.session_id_hash),
            config,
        ));
    };

    if now >= record.session_expires_at {
        return Ok(Transition::terminal(
            SessionState::Expired,
            Action::Delete(record.session_id_hash),
            config,
        ));
    }

    match slot {
        // A request that raced a rotation. Never rotates, even when stale.
        Slot::Previous => Ok(Transition::untouched(record)),
        Slot::Latest if now < record.token_expires_at => Ok(Transition::untouched(record)),
        Slot::Latest => rotate(credential, record, token_hash, now, config),
    }
}

fn rotate(
    credential: &Credential,
    record: SessionRecord,
    current_hash: HashDigest,
    now: DateTime<Utc>,
    config: &SessionConfig,
) -> Result<Transition, Error> {
    let token_expires_at = expiry(now, config.token_ttl(), "token")?;
    // Never shorten the session, even if the TTL was lowered since login.
    let session_expires_at =
        expiry(now, config.session_ttl(), "session")?.max(record.session_expires_at);
    let token = generate_token()?;
    let update = SessionUpdate {
        latest_token_hash: Some(digest(&token)),
        previous_token_hash: Some(current_hash),
        session_expires_at: Some(session_expires_at),
        token_expires_at: Some(token_expires_at),
    };
    let cookie = config.issue_cookie(
        credential::encode(credential.session_id(), &token),
        session_expires_at,
    );

    Ok(Transition {
        state: SessionState::Active { rotated: true },
        action: Action::Replace {
            session_id_hash: record.session_id_hash,
            update,
        },
        cookie: Some(cookie),
        application_data: Some(record.application_data),
    })
}

/// Allocate a new session id and first token.
///
/// # Errors
/// Returns [`Error::Entropy`] if the OS random source fails, or
/// [`Error::TtlOverflow`] if a configured TTL is out of range.
pub fn login(
    application_data: Value,
    now: DateTime<Utc>,
    config: &SessionConfig,
) -> Result<Login, Error> {
    let session_expires_at = expiry(now, config.session_ttl(), "session")?;
    let token_expires_at = expiry(now, config.token_ttl(), "token")?;
    let session_id = generate_token()?;
    let token = generate_token()?;

    let record = SessionRecord {
        session_id_hash: digest(&session_id),
        latest_token_hash: digest(&token),
        previous_token_hash: None,
        session_expires_at,
        token_expires_at,
        application_data,
    };

    Ok(Login {
        session_id_hash: record.session_id_hash.clone(),
        cookie: config.issue_cookie(credential::encode(&session_id, &token), session_expires_at),
        action: Action::Create(record),
    })
}

fn expiry(
    now: DateTime<Utc>,
    ttl: Duration,
    which: &'static str,
) -> Result<DateTime<Utc>, Error> {
    now.checked_add_signed(ttl).ok_or(Error::TtlOverflow(which))
}

/// Log out without looking at the token. Logging out is never worth refusing.
#[must_use]
pub fn logout(credential: &Credential, config: &SessionConfig) -> (CookieDirective, Action) {
    (
        config.logout_cookie(),
        Action::Delete(credential.session_id_hash().clone()),
    )
}
