//! Streaming pull ingress.
//!
//! A dedicated OS thread pulls batches from the subscription, hands each
//! decoded event to the async handler on the tokio runtime, and settles
//! the message according to the configured [`AckPolicy`](crate::config::AckPolicy).

pub mod auth;
pub mod rest;
pub mod worker;

pub use auth::TokenSource;
pub use rest::PubSubRestSubscription;
pub use worker::{start_subscriber, SubscriberHandle, SubscriberOptions};

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::PubSubMessage;

#[derive(Error, Debug)]
pub enum SubscriberError {
    #[error("Cannot reach Pub/Sub at {0}")]
    Connection(String),

    #[error("Pub/Sub HTTP client error: {0}")]
    HttpClient(String),

    #[error("Pub/Sub {0} request timed out")]
    Timeout(String),

    #[error("Pub/Sub returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse Pub/Sub response: {0}")]
    ResponseParsing(String),

    #[error("Subscriber not configured: {0}")]
    NotConfigured(String),

    #[error("Cannot obtain Pub/Sub credentials: {0}")]
    Credentials(String),
}

impl SubscriberError {
    /// Credentials missing, expired or refused.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            SubscriberError::Credentials(_) | SubscriberError::Status { status: 401 | 403, .. }
        )
    }
}

/// One message leased from a pull.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: PubSubMessage,
}

/// Blocking pull subscription. Runs on the subscriber thread only.
pub trait Subscription: Send {
    /// Lease up to `max_messages`. An empty batch means nothing is pending.
    fn pull(&self, max_messages: u32) -> Result<Vec<ReceivedMessage>, SubscriberError>;

    fn ack(&self, ack_ids: &[String]) -> Result<(), SubscriberError>;

    /// Release the lease so the broker redelivers immediately.
    fn nack(&self, ack_ids: &[String]) -> Result<(), SubscriberError>;

    /// Push the ack deadline of leased messages `seconds` into the future.
    fn extend(&self, ack_ids: &[String], seconds: u32) -> Result<(), SubscriberError>;
}

impl<T: Subscription + Sync> Subscription for Arc<T> {
    fn pull(&self, max_messages: u32) -> Result<Vec<ReceivedMessage>, SubscriberError> {
        (**self).pull(max_messages)
    }

    fn ack(&self, ack_ids: &[String]) -> Result<(), SubscriberError> {
        (**self).ack(ack_ids)
    }

    fn nack(&self, ack_ids: &[String]) -> Result<(), SubscriberError> {
        (**self).nack(ack_ids)
    }

    fn extend(&self, ack_ids: &[String], seconds: u32) -> Result<(), SubscriberError> {
        (**self).extend(ack_ids, seconds)
    }
}
