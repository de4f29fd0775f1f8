//! Shared types for the HTTP ingress.

use std::sync::Arc;

use serde::Serialize;

use crate::classifier::WellnessState;
use crate::config::{Environment, APP_VERSION};
use crate::pipeline::{JournalEventHandler, Outcome, OutcomeStatus};

/// Shared context for all routes.
#[derive(Clone)]
pub struct ApiContext {
    pub handler: Arc<JournalEventHandler>,
    pub environment: Environment,
}

impl ApiContext {
    pub fn new(handler: Arc<JournalEventHandler>, environment: Environment) -> Self {
        Self {
            handler,
            environment,
        }
    }
}

/// Response to a push delivery that was acknowledged.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wellness_state: Option<WellnessState>,
}

impl PushResponse {
    pub fn new(outcome: Outcome, message_id: Option<String>) -> Self {
        let status = outcome.status();
        let wellness_state = match outcome {
            Outcome::Processed(state) => Some(state),
            Outcome::Ignored { .. } | Outcome::Missing => None,
        };
        Self {
            status,
            message_id,
            wellness_state,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub environment: &'static str,
}

impl HealthResponse {
    pub fn ok(environment: Environment) -> Self {
        Self {
            status: "ok",
            version: APP_VERSION,
            environment: environment.as_str(),
        }
    }
}
