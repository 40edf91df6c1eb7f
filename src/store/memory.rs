//! In-process session store backed by a `HashMap`.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{SessionStore, StoreError};
use crate::record::{SessionRecord, SessionUpdate};
use crate::token::HashDigest;

/// Session store kept in memory. Records are lost on restart and expired
/// ones are never collected.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<HashDigest, SessionRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn read(
        &self,
        session_id_hash: &HashDigest,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.records.read().await.get(session_id_hash).cloned())
    }

    async fn create(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.session_id_hash) {
            return Err(StoreError::Conflict);
        }
        records.insert(record.session_id_hash.clone(), record.clone());
        Ok(())
    }

    async fn replace(
        &self,
        session_id_hash: &HashDigest,
        update: &SessionUpdate,
    ) -> Result<(), StoreError> {
        if let Some(record) = self.records.write().await.get_mut(session_id_hash) {
            record.apply(update);
        }
        Ok(())
    }

    async fn delete(&self, session_id_hash: &HashDigest) -> Result<(), StoreError> {
        self.records.write().await.remove(session_id_hash);
        Ok(())
    }
}
