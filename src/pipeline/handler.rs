//! Journal event handler: fetch → decrypt → classify → persist.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use super::envelope::JournalEvent;
use super::PipelineError;
use crate::classifier::{WellnessAnalyzer, WellnessState};
use crate::crypto::ContentKey;
use crate::db::{DatabaseError, JournalStore};

/// Serializes classifier calls across every in-flight message.
///
/// Only inference runs under this lock; fetch, decrypt and persist of
/// different messages overlap freely.
#[derive(Clone, Default)]
pub struct InferenceLock {
    inner: Arc<Mutex<()>>,
}

impl InferenceLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().await
    }
}

/// What happened to one event. Every variant acknowledges the message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Classified and persisted.
    Processed(WellnessState),
    /// Event type is not one this worker acts on.
    Ignored { event_type: String },
    /// No journal row for the event's keys.
    Missing,
}

impl Outcome {
    pub fn status(&self) -> OutcomeStatus {
        match self {
            Outcome::Processed(_) => OutcomeStatus::Processed,
            Outcome::Ignored { .. } => OutcomeStatus::Ignored,
            Outcome::Missing => OutcomeStatus::Missing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Processed,
    Ignored,
    Missing,
}

/// Runs one journal event through the pipeline.
///
/// Shared by both ingresses. Collaborators are passed in at construction;
/// nothing here is process-global.
pub struct JournalEventHandler {
    store: Arc<dyn JournalStore>,
    analyzer: Arc<WellnessAnalyzer>,
    key: Arc<ContentKey>,
    inference_lock: InferenceLock,
}

impl JournalEventHandler {
    pub fn new(
        store: Arc<dyn JournalStore>,
        analyzer: Arc<WellnessAnalyzer>,
        key: Arc<ContentKey>,
        inference_lock: InferenceLock,
    ) -> Self {
        Self {
            store,
            analyzer,
            key,
            inference_lock,
        }
    }

    /// Process one event.
    ///
    /// Non-actionable events and missing entries are successes. Any error
    /// returned here (other than `Validation`) should make the broker
    /// redeliver the message.
    pub async fn handle_event(&self, event: JournalEvent) -> Result<Outcome, PipelineError> {
        if !event.is_actionable() {
            tracing::info!(event_type = %event.event_type, "Ignoring event");
            return Ok(Outcome::Ignored {
                event_type: event.event_type,
            });
        }

        let JournalEvent {
            journal_id,
            user_id,
            ..
        } = event;

        // Step 1: Fetch
        let blob = match self.store.fetch_journal(&journal_id, &user_id).await {
            Ok(blob) => blob,
            Err(DatabaseError::NotFound { .. }) => {
                tracing::warn!(%journal_id, %user_id, "No journal entry found");
                return Ok(Outcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };

        // Step 2: Decrypt; failures propagate to the ingress
        let text = blob.decrypt(&self.key)?;

        // Step 3: Classify under the inference lock
        let state = self.classify(text).await?;

        // Step 4: Persist
        match self
            .store
            .update_wellness_state(&journal_id, &user_id, &state)
            .await
        {
            Ok(()) => {}
            Err(DatabaseError::NotFound { .. }) => {
                tracing::warn!(%journal_id, %user_id, "Journal entry vanished before update");
                return Ok(Outcome::Missing);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            %journal_id,
            %user_id,
            top_label = state.top().map(|s| s.label.as_str()).unwrap_or(""),
            "Updated wellness state"
        );
        Ok(Outcome::Processed(state))
    }

    async fn classify(&self, text: String) -> Result<WellnessState, PipelineError> {
        let _guard = self.inference_lock.acquire().await;
        let analyzer = Arc::clone(&self.analyzer);

        tokio::task::spawn_blocking(move || analyzer.analyze_one(&text))
            .await
            .map_err(|e| PipelineError::Classification(format!("inference task failed: {e}")))?
            .map_err(PipelineError::from)
    }
}
