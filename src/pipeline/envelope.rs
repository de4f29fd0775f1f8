//! Broker envelopes and the journal event they carry.

use std::collections::HashMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::PipelineError;

/// Event type that triggers classification.
pub const JOURNAL_ENTRY_CREATED: &str = "JOURNAL_ENTRY_CREATED";

/// Payload published by the journal service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEvent {
    pub event_type: String,
    pub user_id: String,
    pub journal_id: String,
}

impl JournalEvent {
    pub fn journal_created(user_id: impl Into<String>, journal_id: impl Into<String>) -> Self {
        Self {
            event_type: JOURNAL_ENTRY_CREATED.to_string(),
            user_id: user_id.into(),
            journal_id: journal_id.into(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.event_type == JOURNAL_ENTRY_CREATED
    }
}

/// Pub/Sub message: base64 `data` plus broker metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub publish_time: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Body of a Pub/Sub push delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PubSubMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

/// Decode a push request body into its envelope and journal event.
pub fn decode_push_body(body: &[u8]) -> Result<(PushEnvelope, JournalEvent), PipelineError> {
    let envelope: PushEnvelope = serde_json::from_slice(body)
        .map_err(|e| PipelineError::Validation(format!("invalid push envelope: {e}")))?;
    let event = decode_message_data(&envelope.message.data)?;
    Ok((envelope, event))
}

/// base64 → UTF-8 → JSON → `JournalEvent`.
pub fn decode_message_data(data: &str) -> Result<JournalEvent, PipelineError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| PipelineError::Validation(format!("message data is not base64: {e}")))?;
    decode_event(&bytes)
}

/// UTF-8 JSON bytes → `JournalEvent`.
pub fn decode_event(bytes: &[u8]) -> Result<JournalEvent, PipelineError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| PipelineError::Validation(format!("message data is not UTF-8: {e}")))?;
    serde_json::from_str(text)
        .map_err(|e| PipelineError::Validation(format!("message data is not a journal event: {e}")))
}

/// Encode an event the way the journal service publishes it.
pub fn encode_message_data(event: &JournalEvent) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(event)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}
