//! Conformance check for [`SessionStore`] implementations.
//!
//! Drives a real session through the store: create, two rotations, lookups
//! of both live tokens, delete. The easy mistake is overwriting a slot
//! instead of shifting it, or nulling a slot on a partial update; both are
//! caught here.
//!
//! On failure the check stops immediately and leaves its record in the
//! store, so the broken state can be inspected.

use chrono::{Duration, SubsecRound};
use serde_json::json;
use thiserror::Error;

use crate::config::SessionConfig;
use crate::credential::{self, Credential};
use crate::machine::{self, Action, SessionState, Transition};
use crate::manager;
use crate::record::{SessionRecord, SessionUpdate, Slot};
use crate::store::{SessionStore, StoreError};

#[derive(Debug, Error)]
pub enum ConformanceError {
    #[error("store call failed during {step}: {source}")]
    Store {
        step: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("session operation failed during {step}: {source}")]
    Session {
        step: &'static str,
        #[source]
        source: crate::Error,
    },
    #[error("{step}: {detail}")]
    Mismatch { step: &'static str, detail: String },
}

fn mismatch(step: &'static str, detail: impl Into<String>) -> ConformanceError {
    ConformanceError::Mismatch {
        step,
        detail: detail.into(),
    }
}

fn ensure(condition: bool, step: &'static str, detail: &str) -> Result<(), ConformanceError> {
    if condition {
        Ok(())
    } else {
        Err(mismatch(step, detail))
    }
}

struct Harness<'a, S: ?Sized> {
    store: &'a S,
    config: SessionConfig,
}

impl<S: SessionStore + ?Sized> Harness<'_, S> {
    async fn read(
        &self,
        step: &'static str,
        credential: &Credential,
    ) -> Result<Option<SessionRecord>, ConformanceError> {
        self.store
            .read(credential.session_id_hash())
            .await
            .map_err(|source| ConformanceError::Store { step, source })
    }

    async fn read_existing(
        &self,
        step: &'static str,
        credential: &Credential,
    ) -> Result<SessionRecord, ConformanceError> {
        self.read(step, credential)
            .await?
            .ok_or_else(|| mismatch(step, "record missing"))
    }

    async fn apply(&self, step: &'static str, action: &Action) -> Result<(), ConformanceError> {
        manager::apply_action(self.store, action)
            .await
            .map_err(|source| ConformanceError::Store { step, source })
    }

    /// Present `credential` at `offset` past the start of the run.
    async fn consume(
        &self,
        step: &'static str,
        credential: &Credential,
        offset: Duration,
        start: chrono::DateTime<chrono::Utc>,
    ) -> Result<Transition, ConformanceError> {
        let record = self.read(step, credential).await?;
        let transition = machine::consume(credential, record, start + offset, &self.config)
            .map_err(|source| ConformanceError::Session { step, source })?;
        self.apply(step, &transition.action).await?;
        Ok(transition)
    }
}

fn next_credential(
    step: &'static str,
    transition: &Transition,
) -> Result<Credential, ConformanceError> {
    ensure(
        transition.state == (SessionState::Active { rotated: true }),
        step,
        &format!("expected a rotation, got {}", transition.state),
    )?;
    let cookie = transition
        .cookie
        .as_ref()
        .ok_or_else(|| mismatch(step, "rotation without cookie"))?;
    credential::decode(&cookie.value).map_err(|err| mismatch(step, err.to_string()))
}

/// Run the conformance sequence against `store`.
///
/// # Errors
/// Returns the first deviation from the [`SessionStore`] contract.
pub async fn verify_store<S>(store: &S) -> Result<(), ConformanceError>
where
    S: SessionStore + ?Sized,
{
    let config = SessionConfig::new()
        .with_session_ttl(Duration::hours(1))
        .with_token_ttl(Duration::minutes(1));
    // Whole seconds, so backends that round sub-second precision agree.
    let start = config.now().trunc_subsecs(0);
    let token_ttl = config.token_ttl();
    let harness = Harness { store, config };

    // create
    let login = machine::login(json!({"conformance": true}), start, &harness.config)
        .map_err(|source| ConformanceError::Session {
            step: "login",
            source,
        })?;
    let first = credential::decode(&login.cookie.value)
        .map_err(|err| mismatch("login", err.to_string()))?;
    harness.apply("create", &login.action).await?;
    let created = harness.read_existing("read after create", &first).await?;
    ensure(
        created.previous_token_hash.is_none(),
        "read after create",
        "previous slot must be empty on a new session",
    )?;
    ensure(
        created.slot_of(&first.token_hash()) == Some(Slot::Latest),
        "read after create",
        "latest slot does not hold the issued token",
    )?;
    ensure(
        created.application_data == json!({"conformance": true}),
        "read after create",
        "application data not returned verbatim",
    )?;

    // A repeated create may conflict or act as an upsert, but must not
    // change the stored record.
    if let Action::Create(record) = &login.action {
        match store.create(record).await {
            Ok(()) | Err(StoreError::Conflict) => {}
            Err(source) => {
                return Err(ConformanceError::Store {
                    step: "duplicate create",
                    source,
                })
            }
        }
        let again = harness.read_existing("read after duplicate create", &first).await?;
        ensure(
            again == created,
            "read after duplicate create",
            "record changed by a repeated create",
        )?;
    }

    // first rotation
    let rotation = harness
        .consume("first rotation", &first, token_ttl, start)
        .await?;
    let second = next_credential("first rotation", &rotation)?;
    let record = harness.read_existing("read after first rotation", &first).await?;
    ensure(
        record.slot_of(&second.token_hash()) == Some(Slot::Latest)
            && record.slot_of(&first.token_hash()) == Some(Slot::Previous),
        "read after first rotation",
        "slots were not shifted",
    )?;

    // partial update must not touch token slots
    let later = record.token_expires_at + Duration::seconds(1);
    harness
        .apply(
            "partial update",
            &Action::Replace {
                session_id_hash: record.session_id_hash.clone(),
                update: SessionUpdate {
                    token_expires_at: Some(later),
                    ..SessionUpdate::default()
                },
            },
        )
        .await?;
    let patched = harness.read_existing("read after partial update", &first).await?;
    ensure(
        patched.latest_token_hash == record.latest_token_hash
            && patched.previous_token_hash == record.previous_token_hash
            && patched.session_expires_at == record.session_expires_at,
        "read after partial update",
        "unset fields were overwritten",
    )?;
    ensure(
        patched.token_expires_at == later,
        "read after partial update",
        "token expiry was not updated",
    )?;

    // second rotation
    let rotation = harness
        .consume("second rotation", &second, token_ttl * 3, start)
        .await?;
    let third = next_credential("second rotation", &rotation)?;
    let record = harness.read_existing("read after second rotation", &first).await?;
    ensure(
        record.slot_of(&third.token_hash()) == Some(Slot::Latest)
            && record.slot_of(&second.token_hash()) == Some(Slot::Previous),
        "read after second rotation",
        "slots were not shifted",
    )?;
    ensure(
        record.slot_of(&first.token_hash()).is_none(),
        "read after second rotation",
        "oldest token survived two rotations",
    )?;

    // both live tokens still resolve, without rotating again
    for (step, credential) in [
        ("lookup previous token", &second),
        ("lookup latest token", &third),
    ] {
        let transition = harness
            .consume(step, credential, token_ttl * 3, start)
            .await?;
        ensure(
            transition.state == (SessionState::Active { rotated: false }),
            step,
            &format!("expected active, got {}", transition.state),
        )?;
    }

    // delete
    harness
        .apply("delete", &Action::Delete(first.session_id_hash().clone()))
        .await?;
    for credential in [&first, &second, &third] {
        ensure(
            harness.read("read after delete", credential).await?.is_none(),
            "read after delete",
            "record still present",
        )?;
    }
    harness
        .apply("repeat delete", &Action::Delete(first.session_id_hash().clone()))
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::token::HashDigest;
    use async_trait::async_trait;

    /// Store that copies the previous slot from every update, nulling it
    /// whenever the update leaves it unset.
    #[derive(Default)]
    struct NullingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl SessionStore for NullingStore {
        async fn read(&self, key: &HashDigest) -> Result<Option<SessionRecord>, StoreError> {
            self.inner.read(key).await
        }

        async fn create(&self, record: &SessionRecord) -> Result<(), StoreError> {
            self.inner.create(record).await
        }

        async fn replace(&self, key: &HashDigest, update: &SessionUpdate) -> Result<(), StoreError> {
            let Some(mut record) = self.inner.read(key).await? else {
                return Ok(());
            };
            record.previous_token_hash = update.previous_token_hash.clone();
            record.apply(update);
            self.inner.delete(key).await?;
            self.inner.create(&record).await
        }

        async fn delete(&self, key: &HashDigest) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
    }

    /// Store that treats `create` as an upsert.
    #[derive(Default)]
    struct UpsertStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl SessionStore for UpsertStore {
        async fn read(&self, key: &HashDigest) -> Result<Option<SessionRecord>, StoreError> {
            self.inner.read(key).await
        }

        async fn create(&self, record: &SessionRecord) -> Result<(), StoreError> {
            self.inner.delete(&record.session_id_hash).await?;
            self.inner.create(record).await
        }

        async fn replace(&self, key: &HashDigest, update: &SessionUpdate) -> Result<(), StoreError> {
            self.inner.replace(key, update).await
        }

        async fn delete(&self, key: &HashDigest) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
    }

    /// Store whose repeated `create` overwrites the payload with null.
    #[derive(Default)]
    struct ResettingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl SessionStore for ResettingStore {
        async fn read(&self, key: &HashDigest) -> Result<Option<SessionRecord>, StoreError> {
            self.inner.read(key).await
        }

        async fn create(&self, record: &SessionRecord) -> Result<(), StoreError> {
            if self.inner.read(&record.session_id_hash).await?.is_none() {
                return self.inner.create(record).await;
            }
            let mut reset = record.clone();
            reset.application_data = serde_json::Value::Null;
            self.inner.delete(&record.session_id_hash).await?;
            self.inner.create(&reset).await
        }

        async fn replace(&self, key: &HashDigest, update: &SessionUpdate) -> Result<(), StoreError> {
            self.inner.replace(key, update).await
        }

        async fn delete(&self, key: &HashDigest) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn nulling_store_is_rejected_and_left_dirty() {
        let store = NullingStore::default();
        let err = verify_store(&store).await.unwrap_err();
        assert!(
            matches!(
                err,
                ConformanceError::Mismatch {
                    step: "read after partial update",
                    ..
                }
            ),
            "unexpected error: {err}"
        );
        assert_eq!(store.inner.len().await, 1);
    }

    #[tokio::test]
    async fn upsert_create_is_accepted() {
        let store = UpsertStore::default();
        verify_store(&store).await.unwrap();
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn create_that_drops_data_on_repeat_is_rejected() {
        let store = ResettingStore::default();
        let err = verify_store(&store).await.unwrap_err();
        assert!(
            matches!(
                err,
                ConformanceError::Mismatch {
                    step: "read after duplicate create",
                    ..
                }
            ),
            "unexpected error: {err}"
        );
        assert_eq!(store.inner.len().await, 1);
    }
}
