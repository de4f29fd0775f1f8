//! Test doubles shared by unit tests across modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::classifier::{ClassifierError, LabelTable, TextClassifier, WellnessAnalyzer, WellnessState};
use crate::crypto::{ContentKey, EncryptedBlob};
use crate::db::{DatabaseError, JournalStore};
use crate::pipeline::{InferenceLock, JournalEventHandler};

pub const TEST_SECRET: &str = "unit-test-content-secret-0123456789";

pub fn test_key() -> ContentKey {
    ContentKey::from_secret(TEST_SECRET)
}

/// Classifier returning canned logits: input `i` gets `rows[i % rows.len()]`.
pub struct FixedClassifier {
    rows: Vec<Vec<f32>>,
    fail: bool,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl FixedClassifier {
    pub fn cycling(rows: Vec<Vec<f32>>) -> Self {
        Self {
            rows,
            fail: false,
            delay: None,
            calls: Arc::default(),
            active: Arc::default(),
            max_active: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::cycling(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Highest number of simultaneous `logits` calls observed.
    pub fn max_active(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.max_active)
    }
}

impl TextClassifier for FixedClassifier {
    fn logits(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail || self.rows.is_empty() {
            return Err(ClassifierError::Inference("model exploded".into()));
        }
        Ok((0..texts.len())
            .map(|i| self.rows[i % self.rows.len()].clone())
            .collect())
    }
}

/// In-memory `JournalStore` that records every write.
#[derive(Default)]
pub struct MemoryJournalStore {
    entries: Mutex<HashMap<(String, String), EncryptedBlob>>,
    updates: Mutex<Vec<(String, String, String)>>,
    fetches: AtomicUsize,
    fail_fetches: AtomicBool,
    updates_not_found: AtomicBool,
}

impl MemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, journal_id: &str, user_id: &str, blob: EncryptedBlob) {
        self.entries
            .lock()
            .unwrap()
            .insert((journal_id.to_string(), user_id.to_string()), blob);
    }

    /// `(journal_id, user_id, wellness_state JSON)` for each update.
    pub fn updates(&self) -> Vec<(String, String, String)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fail_fetches(&self) {
        self.fail_fetches.store(true, Ordering::SeqCst);
    }

    pub fn fail_updates_with_not_found(&self) {
        self.updates_not_found.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl JournalStore for MemoryJournalStore {
    async fn fetch_journal(
        &self,
        journal_id: &str,
        user_id: &str,
    ) -> Result<EncryptedBlob, DatabaseError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(DatabaseError::Task("connection reset".into()));
        }
        self.entries
            .lock()
            .unwrap()
            .get(&(journal_id.to_string(), user_id.to_string()))
            .cloned()
            .ok_or_else(|| DatabaseError::not_found(journal_id, user_id))
    }

    async fn update_wellness_state(
        &self,
        journal_id: &str,
        user_id: &str,
        state: &WellnessState,
    ) -> Result<(), DatabaseError> {
        if self.updates_not_found.load(Ordering::SeqCst) {
            return Err(DatabaseError::not_found(journal_id, user_id));
        }
        self.updates.lock().unwrap().push((
            journal_id.to_string(),
            user_id.to_string(),
            state.to_json()?,
        ));
        Ok(())
    }
}

/// Handler over an in-memory store and a fixed classifier.
pub fn test_handler(store: Arc<MemoryJournalStore>) -> Arc<JournalEventHandler> {
    let analyzer = WellnessAnalyzer::new(
        Box::new(FixedClassifier::cycling(vec![vec![0.4, 2.0, 0.3, -1.5, 0.9]])),
        LabelTable::wellness(),
    );
    Arc::new(JournalEventHandler::new(
        store,
        Arc::new(analyzer),
        Arc::new(test_key()),
        InferenceLock::new(),
    ))
}

/// Store with one decryptable entry `(j1, u1)`.
pub fn seeded_store() -> Arc<MemoryJournalStore> {
    let store = Arc::new(MemoryJournalStore::new());
    let blob = EncryptedBlob::encrypt(&test_key(), "Had a good day with friends.")
        .expect("test encryption");
    store.insert("j1", "u1", blob);
    store
}
