//! Persisted session state.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::token::HashDigest;

/// One logical login, as stored by a [`crate::store::SessionStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub session_id_hash: HashDigest,
    /// Digest of the most recently issued token.
    pub latest_token_hash: HashDigest,
    /// Digest of the token issued just before the latest one. `None` until
    /// the first rotation.
    pub previous_token_hash: Option<HashDigest>,
    pub session_expires_at: DateTime<Utc>,
    pub token_expires_at: DateTime<Utc>,
    /// Caller payload, returned verbatim on every successful read.
    pub application_data: Value,
}

impl SessionRecord {
    /// Which slot, if any, holds `token_hash`.
    #[must_use]
    pub fn slot_of(&self, token_hash: &HashDigest) -> Option<Slot> {
        if &self.latest_token_hash == token_hash {
            Some(Slot::Latest)
        } else if self.previous_token_hash.as_ref() == Some(token_hash) {
            Some(Slot::Previous)
        } else {
            None
        }
    }

    /// Apply a partial update the way every store must: unset fields keep
    /// their current value.
    pub fn apply(&mut self, update: &SessionUpdate) {
        if let Some(hash) = &update.latest_token_hash {
            self.latest_token_hash = hash.clone();
        }
        if let Some(hash) = &update.previous_token_hash {
            self.previous_token_hash = Some(hash.clone());
        }
        if let Some(at) = update.session_expires_at {
            self.session_expires_at = at;
        }
        if let Some(at) = update.token_expires_at {
            self.token_expires_at = at;
        }
    }
}

/// Token slot of a [`SessionRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Latest,
    Previous,
}

/// Partial overwrite of a [`SessionRecord`].
///
/// `None` means "leave the stored value alone", never "set to null". There is
/// no way to clear a token slot through an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub latest_token_hash: Option<HashDigest>,
    pub previous_token_hash: Option<HashDigest>,
    pub session_expires_at: Option<DateTime<Utc>>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
