//! Runs the state machine against a [`SessionStore`].
//!
//! One read, one decision, at most one write per call. No retries: a failed
//! store call is returned to the caller, and a rotation that was not applied
//! simply happens again on the next request.

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::credential;
use crate::directive::CookieDirective;
use crate::machine::{self, Action, Login, SessionState, Transition};
use crate::store::{SessionStore, StoreError};
use crate::Error;

#[derive(Debug)]
pub struct SessionManager<S> {
    store: S,
    config: SessionConfig,
}

impl<S: SessionStore> SessionManager<S> {
    #[must_use]
    pub fn new(store: S, config: SessionConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a session carrying `application_data`.
    ///
    /// # Errors
    /// Returns an error if no token can be generated or the store rejects
    /// the insert.
    #[instrument(skip_all)]
    pub async fn login(&self, application_data: Value) -> Result<Login, Error> {
        let login = machine::login(application_data, self.config.now(), &self.config)?;
        self.apply(&login.action).await?;
        info!(session = login.session_id_hash.short(), "session created");
        Ok(login)
    }

    /// Evaluate the session cookie of a request and apply the outcome.
    ///
    /// # Errors
    /// Returns an error only for store or RNG failures. Every session state,
    /// forked included, is a regular [`Transition`].
    #[instrument(skip_all)]
    pub async fn consume(&self, cookie_value: Option<&str>) -> Result<Transition, Error> {
        let Some(cookie_value) = cookie_value else {
            return Ok(machine::cookie_missing());
        };
        let credential = match credential::decode(cookie_value) {
            Ok(credential) => credential,
            Err(err) => {
                debug!("rejecting session cookie: {err}");
                return Ok(machine::cookie_malformed(&self.config));
            }
        };

        let session = credential.session_id_hash().short().to_string();
        let record = self.store.read(credential.session_id_hash()).await?;
        let transition =
            machine::consume(&credential, record, self.config.now(), &self.config)?;
        self.apply(&transition.action).await?;

        match transition.state {
            SessionState::Forked => {
                warn!(session = %session, "session fork detected, session revoked");
            }
            SessionState::Active { rotated: true } => {
                debug!(session = %session, "session token rotated");
            }
            state => {
                debug!(session = %session, %state, "session evaluated");
            }
        }

        Ok(transition)
    }

    /// End the session named by the cookie, if it decodes. The token is not
    /// checked. The returned directive always clears the cookie.
    ///
    /// # Errors
    /// Returns an error if the store delete fails.
    #[instrument(skip_all)]
    pub async fn logout(&self, cookie_value: Option<&str>) -> Result<CookieDirective, Error> {
        let Some(credential) = cookie_value.and_then(|value| credential::decode(value).ok()) else {
            return Ok(self.config.logout_cookie());
        };
        let (cookie, action) = machine::logout(&credential, &self.config);
        self.apply(&action).await?;
        info!(
            session = credential.session_id_hash().short(),
            "session logged out"
        );
        Ok(cookie)
    }

    /// Execute a store action, exactly one store call per action.
    ///
    /// # Errors
    /// Returns the store error unchanged.
    pub async fn apply(&self, action: &Action) -> Result<(), Error> {
        apply_action(&self.store, action).await?;
        Ok(())
    }
}

/// Map an [`Action`] onto `store`, one call per action.
pub(crate) async fn apply_action<S>(store: &S, action: &Action) -> Result<(), StoreError>
where
    S: SessionStore + ?Sized,
{
    match action {
        Action::None => Ok(()),
        Action::Create(record) => store.create(record).await,
        Action::Replace {
            session_id_hash,
            update,
        } => store.replace(session_id_hash, update).await,
        Action::Delete(session_id_hash) => store.delete(session_id_hash).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{decode, Credential};
    use crate::record::{SessionRecord, SessionUpdate, Slot};
    use crate::store::MemoryStore;
    use crate::token::{digest, HashDigest};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Barrier;

    /// Clock that tests can move forward.
    #[derive(Clone)]
    struct TestClock(Arc<Mutex<DateTime<Utc>>>);

    impl TestClock {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            )))
        }

        fn start(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        }

        fn set(&self, at: DateTime<Utc>) {
            *self.0.lock().unwrap() = at;
        }
    }

    fn config(clock: &TestClock) -> SessionConfig {
        let handle = clock.clone();
        SessionConfig::new()
            .with_session_ttl(Duration::hours(5))
            .with_token_ttl(Duration::minutes(10))
            .with_clock(Arc::new(move || *handle.0.lock().unwrap()))
    }

    fn manager(clock: &TestClock) -> SessionManager<MemoryStore> {
        SessionManager::new(MemoryStore::new(), config(clock))
    }

    /// Holds every read until two callers have read, so both decide on the
    /// same record before either writes.
    struct GatedStore {
        inner: MemoryStore,
        gate: Barrier,
    }

    #[async_trait]
    impl SessionStore for GatedStore {
        async fn read(&self, key: &HashDigest) -> Result<Option<SessionRecord>, StoreError> {
            let record = self.inner.read(key).await?;
            self.gate.wait().await;
            Ok(record)
        }

        async fn create(&self, record: &SessionRecord) -> Result<(), StoreError> {
            self.inner.create(record).await
        }

        async fn replace(&self, key: &HashDigest, update: &SessionUpdate) -> Result<(), StoreError> {
            self.inner.replace(key, update).await
        }

        async fn delete(&self, key: &HashDigest) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
    }

    fn cookie_of(login: &Login) -> String {
        login.cookie.value.clone()
    }

    fn rotated_cookie(transition: &Transition) -> String {
        assert_eq!(transition.state, SessionState::Active { rotated: true });
        transition.cookie.as_ref().unwrap().value.clone()
    }

    #[tokio::test]
    async fn scenario_rotation_after_token_ttl() {
        let clock = TestClock::new();
        let manager = manager(&clock);
        let login = manager.login(json!({"user_id": 1})).await.unwrap();
        let cookie = cookie_of(&login);

        clock.set(clock.start() + Duration::minutes(9));
        let transition = manager.consume(Some(&cookie)).await.unwrap();
        assert_eq!(transition.state, SessionState::Active { rotated: false });
        assert!(transition.cookie.is_none());
        assert_eq!(transition.application_data, Some(json!({"user_id": 1})));

        clock.set(clock.start() + Duration::minutes(11));
        let transition = manager.consume(Some(&cookie)).await.unwrap();
        let next = rotated_cookie(&transition);
        assert_ne!(next, cookie);

        let record = manager
            .store()
            .read(&login.session_id_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            record.token_expires_at,
            clock.start() + Duration::minutes(21)
        );
        assert_eq!(
            record.session_expires_at,
            clock.start() + Duration::hours(5) + Duration::minutes(11)
        );
    }

    #[tokio::test]
    async fn scenario_fork_detection() {
        let clock = TestClock::new();
        let manager = manager(&clock);
        let token_a = cookie_of(&manager.login(json!(null)).await.unwrap());

        clock.set(clock.start() + Duration::minutes(11));
        let token_b = rotated_cookie(&manager.consume(Some(&token_a)).await.unwrap());

        clock.set(clock.start() + Duration::minutes(22));
        let token_c = rotated_cookie(&manager.consume(Some(&token_b)).await.unwrap());

        let transition = manager.consume(Some(&token_a)).await.unwrap();
        assert_eq!(transition.state, SessionState::Forked);
        assert!(transition.cookie.unwrap().is_logout());
        assert!(manager.store().is_empty().await);

        let transition = manager.consume(Some(&token_c)).await.unwrap();
        assert_eq!(transition.state, SessionState::NotFound);
        assert!(transition.cookie.unwrap().is_logout());
    }

    #[tokio::test]
    async fn scenario_expiry() {
        let clock = TestClock::new();
        let manager = manager(&clock);
        let cookie = cookie_of(&manager.login(json!(null)).await.unwrap());

        clock.set(clock.start() + Duration::hours(6));
        let transition = manager.consume(Some(&cookie)).await.unwrap();
        assert_eq!(transition.state, SessionState::Expired);
        assert!(manager.store().is_empty().await);

        let transition = manager.consume(Some(&cookie)).await.unwrap();
        assert_eq!(transition.state, SessionState::NotFound);
    }

    #[tokio::test]
    async fn malformed_and_missing_cookies() {
        let clock = TestClock::new();
        let manager = manager(&clock);

        let transition = manager.consume(Some("no-delimiter")).await.unwrap();
        assert_eq!(transition.state, SessionState::CookieMalformed);
        assert!(transition.cookie.unwrap().is_logout());

        let transition = manager.consume(None).await.unwrap();
        assert_eq!(transition.state, SessionState::CookieMissing);
        assert!(transition.cookie.is_none());
    }

    #[tokio::test]
    async fn grace_window_spans_one_rotation() {
        let clock = TestClock::new();
        let manager = manager(&clock);
        let original = cookie_of(&manager.login(json!(null)).await.unwrap());

        clock.set(clock.start() + Duration::minutes(11));
        let second = rotated_cookie(&manager.consume(Some(&original)).await.unwrap());

        clock.set(clock.start() + Duration::minutes(12));
        let transition = manager.consume(Some(&original)).await.unwrap();
        assert_eq!(transition.state, SessionState::Active { rotated: false });
        assert!(transition.cookie.is_none());

        clock.set(clock.start() + Duration::minutes(22));
        rotated_cookie(&manager.consume(Some(&second)).await.unwrap());

        let transition = manager.consume(Some(&original)).await.unwrap();
        assert_eq!(transition.state, SessionState::Forked);
        assert!(manager.store().is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_requests_around_rotation_are_not_forked() {
        let clock = TestClock::new();
        let manager = manager(&clock);
        let cookie = cookie_of(&manager.login(json!(null)).await.unwrap());
        clock.set(clock.start() + Duration::minutes(11));

        // First request rotates; a second one still carrying the old cookie
        // lands right after.
        let (first, second) = tokio::join!(
            manager.consume(Some(&cookie)),
            async {
                tokio::task::yield_now().await;
                manager.consume(Some(&cookie)).await
            }
        );
        let first = first.unwrap();
        let second = second.unwrap();

        let rotations = [first.state, second.state]
            .iter()
            .filter(|state| **state == SessionState::Active { rotated: true })
            .count();
        assert!(rotations >= 1);
        for transition in [&first, &second] {
            assert!(transition.state.is_active());
            assert_ne!(transition.state, SessionState::Forked);
        }
        if rotations == 1 {
            let untouched = if first.state == (SessionState::Active { rotated: true }) {
                &second
            } else {
                &first
            };
            assert_eq!(untouched.action, Action::None);
            assert!(untouched.cookie.is_none());
        }
        assert_eq!(manager.store().len().await, 1);
    }

    #[tokio::test]
    async fn interleaved_rotations_of_one_token_are_not_forked() {
        let clock = TestClock::new();
        let store = GatedStore {
            inner: MemoryStore::new(),
            gate: Barrier::new(2),
        };
        let manager = SessionManager::new(store, config(&clock));
        let login = manager.login(json!(null)).await.unwrap();
        let original = decode(&login.cookie.value).unwrap();
        clock.set(clock.start() + Duration::minutes(11));

        let (first, second) = tokio::join!(
            manager.consume(Some(&login.cookie.value)),
            manager.consume(Some(&login.cookie.value))
        );
        let first = first.unwrap();
        let second = second.unwrap();

        // Both saw the due token before either write landed.
        let first_token = decode(&rotated_cookie(&first)).unwrap().token_hash();
        let second_token = decode(&rotated_cookie(&second)).unwrap().token_hash();
        assert_ne!(first_token, second_token);

        // The last write wins; the original token stays in the grace slot.
        let record = manager
            .store()
            .inner
            .read(&login.session_id_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.slot_of(&original.token_hash()), Some(Slot::Previous));
        assert!(
            record.latest_token_hash == first_token || record.latest_token_hash == second_token
        );
    }

    #[tokio::test]
    async fn apply_action_issues_one_store_call_per_action() {
        let store = MemoryStore::new();
        let start = TestClock::new().start();
        let login = machine::login(json!({"n": 1}), start, &SessionConfig::new()).unwrap();

        apply_action(&store, &login.action).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(matches!(
            apply_action(&store, &login.action).await,
            Err(StoreError::Conflict)
        ));

        apply_action(&store, &Action::None).await.unwrap();
        let before = store.read(&login.session_id_hash).await.unwrap().unwrap();

        let update = SessionUpdate {
            previous_token_hash: Some(digest("older")),
            ..SessionUpdate::default()
        };
        apply_action(
            &store,
            &Action::Replace {
                session_id_hash: login.session_id_hash.clone(),
                update,
            },
        )
        .await
        .unwrap();
        let after = store.read(&login.session_id_hash).await.unwrap().unwrap();
        assert_eq!(after.previous_token_hash, Some(digest("older")));
        assert_eq!(after.latest_token_hash, before.latest_token_hash);

        apply_action(&store, &Action::Delete(login.session_id_hash.clone()))
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn request_after_rotation_with_old_cookie_is_untouched() {
        let clock = TestClock::new();
        let manager = manager(&clock);
        let login = manager.login(json!(null)).await.unwrap();
        let cookie = cookie_of(&login);
        clock.set(clock.start() + Duration::minutes(11));

        manager.consume(Some(&cookie)).await.unwrap();
        let before = manager
            .store()
            .read(&login.session_id_hash)
            .await
            .unwrap();

        clock.set(clock.start() + Duration::minutes(40));
        let transition = manager.consume(Some(&cookie)).await.unwrap();
        assert_eq!(transition.state, SessionState::Active { rotated: false });

        let after = manager
            .store()
            .read(&login.session_id_hash)
            .await
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn logout_deletes_regardless_of_token() {
        let clock = TestClock::new();
        let manager = manager(&clock);
        let login = manager.login(json!(null)).await.unwrap();
        let credential = decode(&login.cookie.value).unwrap();

        let forged = credential::encode(credential.session_id(), "not-a-real-token");
        let cookie = manager.logout(Some(&forged)).await.unwrap();
        assert!(cookie.is_logout());
        assert!(manager
            .store()
            .read(&login.session_id_hash)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn logout_without_valid_cookie_still_clears() {
        let clock = TestClock::new();
        let manager = manager(&clock);
        manager.login(json!(null)).await.unwrap();

        assert!(manager.logout(None).await.unwrap().is_logout());
        assert!(manager.logout(Some("garbage")).await.unwrap().is_logout());
        assert_eq!(manager.store().len().await, 1);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let clock = TestClock::new();
        let manager = manager(&clock);
        let credential = Credential::new("ghost".into(), "token".into());
        let cookie = credential::encode(credential.session_id(), credential.token());
        let transition = manager.consume(Some(&cookie)).await.unwrap();
        assert_eq!(transition.state, SessionState::NotFound);
        assert_eq!(transition.action, Action::None);
        assert!(manager.store().read(&digest("ghost")).await.unwrap().is_none());
    }
}
