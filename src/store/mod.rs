//! Persistence port.
//!
//! The state machine never calls storage itself; it hands back an
//! [`crate::machine::Action`] and the caller applies it through this trait.
//! Each method must be atomic for the single record it touches. No
//! serializability across read, decide and write is assumed.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::record::{SessionRecord, SessionUpdate};
use crate::token::HashDigest;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgSessionStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// `create` hit an existing key.
    #[error("a session with this id already exists")]
    Conflict,
    #[error("session backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

/// Storage contract for session records, keyed by session id digest.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the record, `Ok(None)` when absent.
    async fn read(&self, session_id_hash: &HashDigest)
        -> Result<Option<SessionRecord>, StoreError>;

    /// Insert a new record.
    ///
    /// # Errors
    /// Must return [`StoreError::Conflict`] if the key is already taken.
    async fn create(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Overwrite only the fields set in `update`. A field left `None` must
    /// keep its stored value; in particular a token slot is never nulled.
    /// Replacing an absent key is a no-op.
    async fn replace(
        &self,
        session_id_hash: &HashDigest,
        update: &SessionUpdate,
    ) -> Result<(), StoreError>;

    /// Remove the record. Deleting an absent key is not an error.
    async fn delete(&self, session_id_hash: &HashDigest) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> SessionStore for Arc<S>
where
    S: SessionStore + ?Sized,
{
    async fn read(
        &self,
        session_id_hash: &HashDigest,
    ) -> Result<Option<SessionRecord>, StoreError> {
        (**self).read(session_id_hash).await
    }

    async fn create(&self, record: &SessionRecord) -> Result<(), StoreError> {
        (**self).create(record).await
    }

    async fn replace(
        &self,
        session_id_hash: &HashDigest,
        update: &SessionUpdate,
    ) -> Result<(), StoreError> {
        (**self).replace(session_id_hash, update).await
    }

    async fn delete(&self, session_id_hash: &HashDigest) -> Result<(), StoreError> {
        (**self).delete(session_id_hash).await
    }
}
