use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;

use super::{parse_blob, DatabaseError, JournalStore};
use crate::classifier::WellnessState;
use crate::crypto::EncryptedBlob;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

// Keys are compared as text so the queries work whether the journal
// service declares the id columns as text or uuid.
const SELECT_CONTENT: &str = "SELECT content_encrypted::text FROM journal_entries \
     WHERE journal_id::text = $1 AND user_id::text = $2";

const UPDATE_WELLNESS: &str = "UPDATE journal_entries SET wellness_state = $1 \
     WHERE journal_id::text = $2 AND user_id::text = $3";

/// Journal store backed by the journal service's PostgreSQL database.
#[derive(Clone)]
pub struct PgJournalStore {
    pool: PgPool,
}

impl PgJournalStore {
    /// Connect a pool of at most `max_connections` connections.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .test_before_acquire(true)
            .connect(url)
            .await?;
        tracing::info!(max_connections, "PostgreSQL pool connected");
        Ok(Self { pool })
    }
}

#[async_trait]
impl JournalStore for PgJournalStore {
    async fn fetch_journal(
        &self,
        journal_id: &str,
        user_id: &str,
    ) -> Result<EncryptedBlob, DatabaseError> {
        let row = sqlx::query(SELECT_CONTENT)
            .bind(journal_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let row = row.ok_or_else(|| DatabaseError::not_found(journal_id, user_id))?;
        let raw: String = row.try_get(0)?;
        parse_blob(&raw)
    }

    async fn update_wellness_state(
        &self,
        journal_id: &str,
        user_id: &str,
        state: &WellnessState,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(UPDATE_WELLNESS)
            .bind(Json(state))
            .bind(journal_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found(journal_id, user_id));
        }
        Ok(())
    }
}
