use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_blob, DatabaseError, JournalStore};
use crate::classifier::WellnessState;
use crate::crypto::EncryptedBlob;

/// Open a SQLite connection to the given path and run migrations
pub fn open_database(path: &Path) -> Result<Connection, DatabaseError> {
    let conn = Connection::open(path)?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing)
pub fn open_memory_database() -> Result<Connection, DatabaseError> {
    let conn = Connection::open_in_memory()?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_current_version(conn);

    let migrations: Vec<(i64, &str)> = vec![(
        1,
        include_str!("../../resources/migrations/001_journal_entries.sql"),
    )];

    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql).map_err(|e| DatabaseError::MigrationFailed {
                version,
                reason: e.to_string(),
            })?;
        }
    }

    Ok(())
}

/// Get the current schema version (0 if no schema exists yet)
fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, i64>(0)
    })
    .unwrap_or(0)
}

/// Journal store on a local SQLite file, for development and tests.
///
/// rusqlite is blocking, so every call runs on the blocking pool behind a
/// shared connection.
#[derive(Clone)]
pub struct SqliteJournalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJournalStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = open_database(path)?;
        tracing::info!(path = %path.display(), "SQLite journal store opened");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(open_memory_database()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Insert or replace an entry (local seeding).
    pub fn insert_journal(
        &self,
        journal_id: &str,
        user_id: &str,
        content: &EncryptedBlob,
    ) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(content)?;
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO journal_entries (journal_id, user_id, content_encrypted)
             VALUES (?1, ?2, ?3)",
            params![journal_id, user_id, json],
        )?;
        Ok(())
    }

    /// Stored wellness state of an entry, if any.
    pub fn wellness_state(
        &self,
        journal_id: &str,
        user_id: &str,
    ) -> Result<Option<WellnessState>, DatabaseError> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let raw: Option<Option<String>> = conn
            .query_row(
                "SELECT wellness_state FROM journal_entries
                 WHERE journal_id = ?1 AND user_id = ?2",
                params![journal_id, user_id],
                |row| row.get(0),
            )
            .optional()?;

        match raw.flatten() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| DatabaseError::Task(e.to_string()))?
    }
}

#[async_trait]
impl JournalStore for SqliteJournalStore {
    async fn fetch_journal(
        &self,
        journal_id: &str,
        user_id: &str,
    ) -> Result<EncryptedBlob, DatabaseError> {
        let (journal_id, user_id) = (journal_id.to_string(), user_id.to_string());
        self.with_conn(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT content_encrypted FROM journal_entries
                     WHERE journal_id = ?1 AND user_id = ?2",
                    params![journal_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;

            match raw {
                Some(raw) => parse_blob(&raw),
                None => Err(DatabaseError::not_found(&journal_id, &user_id)),
            }
        })
        .await
    }

    async fn update_wellness_state(
        &self,
        journal_id: &str,
        user_id: &str,
        state: &WellnessState,
    ) -> Result<(), DatabaseError> {
        let json = state.to_json()?;
        let (journal_id, user_id) = (journal_id.to_string(), user_id.to_string());
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE journal_entries SET wellness_state = ?1
                 WHERE journal_id = ?2 AND user_id = ?3",
                params![json, journal_id, user_id],
            )?;
            if updated == 0 {
                return Err(DatabaseError::not_found(&journal_id, &user_id));
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LabelScore;
    use crate::crypto::ContentKey;

    fn blob() -> EncryptedBlob {
        let key = ContentKey::from_secret("test-secret-which-is-at-least-32-chars");
        EncryptedBlob::encrypt_with_iv(&key, &[1u8; 16], "journal text").unwrap()
    }

    fn state(normal: f64) -> WellnessState {
        WellnessState::from_scores(vec![
            LabelScore { label: "Normal".into(), percent: normal },
            LabelScore { label: "Stress".into(), percent: 100.0 - normal },
        ])
    }

    #[test]
    fn schema_version_is_current() {
        let conn = open_memory_database().unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn migration_idempotent() {
        let conn = open_memory_database().unwrap();
        assert!(run_migrations(&conn).is_ok());
    }

    #[test]
    fn file_database_persists_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.db");
        {
            let store = SqliteJournalStore::open(&path).unwrap();
            store.insert_journal("j1", "u1", &blob()).unwrap();
        }
        let conn = open_database(&path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM journal_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn fetch_by_composite_key() {
        let store = SqliteJournalStore::open_in_memory().unwrap();
        store.insert_journal("j1", "u1", &blob()).unwrap();

        let fetched = store.fetch_journal("j1", "u1").await.unwrap();
        assert_eq!(fetched, blob());

        // Same journal id, different user: no match
        let err = store.fetch_journal("j1", "u2").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn fetch_rejects_non_blob_content() {
        let store = SqliteJournalStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO journal_entries (journal_id, user_id, content_encrypted)
                 VALUES ('j1', 'u1', 'plain text')",
                [],
            )
            .unwrap();
        }
        let err = store.fetch_journal("j1", "u1").await.unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidBlob(_)));
    }

    #[tokio::test]
    async fn update_overwrites_whole_state() {
        let store = SqliteJournalStore::open_in_memory().unwrap();
        store.insert_journal("j1", "u1", &blob()).unwrap();

        store.update_wellness_state("j1", "u1", &state(80.0)).await.unwrap();
        let only_anxiety = WellnessState::from_scores(vec![LabelScore {
            label: "Anxiety".into(),
            percent: 100.0,
        }]);
        store.update_wellness_state("j1", "u1", &only_anxiety).await.unwrap();

        let stored = store.wellness_state("j1", "u1").unwrap().unwrap();
        assert_eq!(stored, only_anxiety);
        assert_eq!(stored.get("Normal"), None);
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let store = SqliteJournalStore::open_in_memory().unwrap();
        let err = store
            .update_wellness_state("missing", "u1", &state(50.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn key_values_are_bound_not_interpolated() {
        let store = SqliteJournalStore::open_in_memory().unwrap();
        store.insert_journal("j1", "u1", &blob()).unwrap();

        let err = store
            .fetch_journal("j1' OR '1'='1", "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn fresh_entry_has_no_wellness_state() {
        let store = SqliteJournalStore::open_in_memory().unwrap();
        store.insert_journal("j1", "u1", &blob()).unwrap();
        assert_eq!(store.wellness_state("j1", "u1").unwrap(), None);
    }
}
