//! Runs the store conformance check against a real PostgreSQL database.
//!
//! Set `SESSIONGUARD_TEST_DSN` to a database the test may create tables in.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde_json::json;
use sessionguard::{
    conformance,
    store::{PgSessionStore, SessionStore, StoreError},
    token::{digest, generate_token},
    SessionRecord, SessionUpdate,
};
use sqlx::postgres::PgPoolOptions;

async fn test_store() -> Result<Option<PgSessionStore>> {
    let Ok(dsn) = std::env::var("SESSIONGUARD_TEST_DSN") else {
        eprintln!("Skipping integration test: SESSIONGUARD_TEST_DSN not set");
        return Ok(None);
    };
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&dsn)
        .await
        .context("failed to connect test pool")?;
    let store = PgSessionStore::new(pool);
    store.migrate().await?;
    Ok(Some(store))
}

fn record() -> Result<SessionRecord> {
    let now = Utc::now();
    Ok(SessionRecord {
        session_id_hash: digest(&generate_token()?),
        latest_token_hash: digest(&generate_token()?),
        previous_token_hash: None,
        session_expires_at: now + Duration::hours(1),
        token_expires_at: now + Duration::minutes(1),
        application_data: json!({"user_id": 99, "roles": ["admin"]}),
    })
}

#[tokio::test]
async fn postgres_store_conforms() -> Result<()> {
    let Some(store) = test_store().await? else {
        return Ok(());
    };
    conformance::verify_store(&store).await?;
    Ok(())
}

#[tokio::test]
async fn postgres_store_keeps_slots_on_partial_update() -> Result<()> {
    let Some(store) = test_store().await? else {
        return Ok(());
    };
    let record = record()?;
    store.create(&record).await?;

    let later = Utc::now() + Duration::hours(2);
    store
        .replace(
            &record.session_id_hash,
            &SessionUpdate {
                session_expires_at: Some(later),
                ..SessionUpdate::default()
            },
        )
        .await?;

    let stored = store
        .read(&record.session_id_hash)
        .await?
        .context("record missing")?;
    assert_eq!(stored.latest_token_hash, record.latest_token_hash);
    assert_eq!(stored.previous_token_hash, None);
    assert_eq!(stored.application_data, record.application_data);
    assert_eq!(
        stored.session_expires_at.timestamp(),
        later.timestamp()
    );

    assert!(matches!(
        store.create(&record).await,
        Err(StoreError::Conflict)
    ));

    store.delete(&record.session_id_hash).await?;
    store.delete(&record.session_id_hash).await?;
    assert!(store.read(&record.session_id_hash).await?.is_none());
    Ok(())
}
