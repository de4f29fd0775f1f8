//! Pub/Sub v1 REST subscription over a blocking HTTP client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ReceivedMessage, SubscriberError, Subscription, TokenSource};
use crate::config::PubSubConfig;

const PUBSUB_API: &str = "https://pubsub.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Bounds how long shutdown can wait on an idle long-poll.
const PULL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PubSubRestSubscription {
    base_url: String,
    subscription_path: String,
    tokens: TokenSource,
    pull_timeout: Duration,
    client: reqwest::blocking::Client,
}

impl PubSubRestSubscription {
    /// Build from config. Targets the emulator when `PUBSUB_EMULATOR_HOST` is set.
    ///
    /// Must not be called from inside an async context: the blocking client
    /// owns its own runtime.
    pub fn from_config(config: &PubSubConfig) -> Result<Self, SubscriberError> {
        let subscription_path = config.subscription_path().ok_or_else(|| {
            SubscriberError::NotConfigured("GOOGLE_CLOUD_PROJECT_ID is not set".into())
        })?;
        let base_url = match &config.emulator_host {
            Some(host) => format!("http://{host}"),
            None => PUBSUB_API.to_string(),
        };
        Self::new(&base_url, subscription_path, TokenSource::from_config(config)?)
    }

    pub fn new(
        base_url: &str,
        subscription_path: String,
        tokens: TokenSource,
    ) -> Result<Self, SubscriberError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SubscriberError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            subscription_path,
            tokens,
            pull_timeout: PULL_TIMEOUT,
            client,
        })
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    pub fn subscription_path(&self) -> &str {
        &self.subscription_path
    }

    /// `POST {base}/v1/{subscription}:{method}`
    fn call<B: Serialize>(
        &self,
        method: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<reqwest::blocking::Response, SubscriberError> {
        let url = format!("{}/v1/{}:{method}", self.base_url, self.subscription_path);
        let mut request = self.client.post(&url).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        if let Some(token) = self.tokens.token()? {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| {
            if e.is_connect() {
                SubscriberError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                SubscriberError::Timeout(method.to_string())
            } else {
                SubscriberError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                self.tokens.invalidate();
            }
            let body = response.text().unwrap_or_default();
            return Err(SubscriberError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn modify_ack_deadline(&self, ack_ids: &[String], seconds: u32) -> Result<(), SubscriberError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.call(
            "modifyAckDeadline",
            &ModifyAckDeadlineRequest {
                ack_ids,
                ack_deadline_seconds: seconds,
            },
            None,
        )?;
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

/// An empty pull returns `{}`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineRequest<'a> {
    ack_ids: &'a [String],
    ack_deadline_seconds: u32,
}

impl Subscription for PubSubRestSubscription {
    fn pull(&self, max_messages: u32) -> Result<Vec<ReceivedMessage>, SubscriberError> {
        let response = match self.call("pull", &PullRequest { max_messages }, Some(self.pull_timeout)) {
            Ok(response) => response,
            // Nothing arrived within the long-poll window
            Err(SubscriberError::Timeout(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let parsed: PullResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                SubscriberError::Timeout("pull".into())
            } else {
                SubscriberError::ResponseParsing(e.to_string())
            }
        })?;
        Ok(parsed.received_messages)
    }

    fn ack(&self, ack_ids: &[String]) -> Result<(), SubscriberError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.call("acknowledge", &AcknowledgeRequest { ack_ids }, None)?;
        Ok(())
    }

    fn nack(&self, ack_ids: &[String]) -> Result<(), SubscriberError> {
        self.modify_ack_deadline(ack_ids, 0)
    }

    fn extend(&self, ack_ids: &[String], seconds: u32) -> Result<(), SubscriberError> {
        self.modify_ack_deadline(ack_ids, seconds)
    }
}
