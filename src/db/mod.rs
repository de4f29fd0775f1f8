//! Journal entry persistence.
//!
//! The worker touches exactly two columns of `journal_entries`: it reads
//! `content_encrypted` and overwrites `wellness_state`, both keyed by
//! `(journal_id, user_id)`. Every statement uses bound parameters.

pub mod postgres;
pub mod sqlite;

pub use postgres::PgJournalStore;
pub use sqlite::SqliteJournalStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::classifier::WellnessState;
use crate::crypto::EncryptedBlob;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("Journal entry not found: journal {journal_id} for user {user_id}")]
    NotFound { journal_id: String, user_id: String },

    #[error("Stored content is not an encrypted blob: {0}")]
    InvalidBlob(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Connection lock poisoned")]
    LockPoisoned,

    #[error("Database task failed: {0}")]
    Task(String),
}

impl DatabaseError {
    pub(crate) fn not_found(journal_id: &str, user_id: &str) -> Self {
        DatabaseError::NotFound {
            journal_id: journal_id.to_string(),
            user_id: user_id.to_string(),
        }
    }
}

/// Read/write access to journal entries.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Encrypted content of one entry. `NotFound` when no row matches.
    async fn fetch_journal(
        &self,
        journal_id: &str,
        user_id: &str,
    ) -> Result<EncryptedBlob, DatabaseError>;

    /// Overwrite the entry's wellness state as a whole.
    /// `NotFound` when no row matches.
    async fn update_wellness_state(
        &self,
        journal_id: &str,
        user_id: &str,
        state: &WellnessState,
    ) -> Result<(), DatabaseError>;
}

/// Parse the stored `content_encrypted` JSON.
pub(crate) fn parse_blob(raw: &str) -> Result<EncryptedBlob, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::InvalidBlob(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_blob_accepts_service_json() {
        let blob = parse_blob(r#"{"iv":"aa","content":"bb","tag":"cc","extra":1}"#).unwrap();
        assert_eq!(blob.iv, "aa");
    }

    #[test]
    fn parse_blob_rejects_missing_fields() {
        let err = parse_blob(r#"{"iv":"aa"}"#).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidBlob(_)));
    }

    #[test]
    fn not_found_message_names_both_keys() {
        let err = DatabaseError::not_found("j1", "u1");
        assert_eq!(err.to_string(), "Journal entry not found: journal j1 for user u1");
    }
}
