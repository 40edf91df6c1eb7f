//! `PostgreSQL` session store.
//!
//! Partial updates are expressed with `COALESCE($n, column)`: a `NULL`
//! parameter keeps the stored column, so an unset token slot can never be
//! wiped by a rotation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;

use super::{SessionStore, StoreError};
use crate::record::{SessionRecord, SessionUpdate};
use crate::token::HashDigest;

pub const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `sessions` table and its index if missing.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be applied.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }
}

fn query_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn record_from_row(row: &PgRow) -> Result<SessionRecord, sqlx::Error> {
    Ok(SessionRecord {
        session_id_hash: HashDigest::from_stored(row.try_get("session_id_hash")?),
        latest_token_hash: HashDigest::from_stored(row.try_get("latest_token_hash")?),
        previous_token_hash: row
            .try_get::<Option<String>, _>("previous_token_hash")?
            .map(HashDigest::from_stored),
        session_expires_at: row.try_get::<DateTime<Utc>, _>("session_expires_at")?,
        token_expires_at: row.try_get::<DateTime<Utc>, _>("token_expires_at")?,
        application_data: row.try_get::<Value, _>("application_data")?,
    })
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn read(
        &self,
        session_id_hash: &HashDigest,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let query = r"
            SELECT session_id_hash, latest_token_hash, previous_token_hash,
                   session_expires_at, token_expires_at, application_data
            FROM sessions
            WHERE session_id_hash = $1
        ";
        let row = sqlx::query(query)
            .bind(session_id_hash.as_str())
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(StoreError::backend)?;

        row.as_ref()
            .map(record_from_row)
            .transpose()
            .map_err(StoreError::backend)
    }

    async fn create(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO sessions
                (session_id_hash, latest_token_hash, previous_token_hash,
                 session_expires_at, token_expires_at, application_data)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let result = sqlx::query(query)
            .bind(record.session_id_hash.as_str())
            .bind(record.latest_token_hash.as_str())
            .bind(record.previous_token_hash.as_ref().map(HashDigest::as_str))
            .bind(record.session_expires_at)
            .bind(record.token_expires_at)
            .bind(&record.application_data)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict),
            Err(err) => Err(StoreError::backend(err)),
        }
    }

    async fn replace(
        &self,
        session_id_hash: &HashDigest,
        update: &SessionUpdate,
    ) -> Result<(), StoreError> {
        let query = r"
            UPDATE sessions SET
                latest_token_hash   = COALESCE($2, latest_token_hash),
                previous_token_hash = COALESCE($3, previous_token_hash),
                session_expires_at  = COALESCE($4, session_expires_at),
                token_expires_at    = COALESCE($5, token_expires_at)
            WHERE session_id_hash = $1
        ";
        sqlx::query(query)
            .bind(session_id_hash.as_str())
            .bind(update.latest_token_hash.as_ref().map(HashDigest::as_str))
            .bind(update.previous_token_hash.as_ref().map(HashDigest::as_str))
            .bind(update.session_expires_at)
            .bind(update.token_expires_at)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn delete(&self, session_id_hash: &HashDigest) -> Result<(), StoreError> {
        let query = "DELETE FROM sessions WHERE session_id_hash = $1";
        sqlx::query(query)
            .bind(session_id_hash.as_str())
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }
}
