//! Bearer tokens for the Pub/Sub REST API.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Deserialize;

use super::SubscriberError;
use crate::config::{PubSubConfig, Secret};

const METADATA_HOST: &str = "metadata.google.internal";
const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
/// Cached tokens are replaced this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Where request credentials come from.
pub enum TokenSource {
    /// Emulator: requests go out unauthenticated.
    Anonymous,
    /// Operator-supplied token, sent as-is until it is replaced.
    Static(Secret),
    /// Service-account tokens from the GCE / Cloud Run metadata server.
    Metadata(MetadataTokens),
}

impl TokenSource {
    pub fn from_config(config: &PubSubConfig) -> Result<Self, SubscriberError> {
        if config.emulator_host.is_some() {
            return Ok(Self::Anonymous);
        }
        if let Some(token) = &config.access_token {
            tracing::warn!("Using PUBSUB_ACCESS_TOKEN; it is not refreshed when it expires");
            return Ok(Self::Static(token.clone()));
        }
        let host = config.metadata_host.as_deref().unwrap_or(METADATA_HOST);
        Ok(Self::Metadata(MetadataTokens::new(host)?))
    }

    /// Current bearer token, if requests are authenticated.
    pub fn token(&self) -> Result<Option<String>, SubscriberError> {
        match self {
            Self::Anonymous => Ok(None),
            Self::Static(secret) => Ok(Some(secret.expose().to_string())),
            Self::Metadata(tokens) => tokens.token().map(Some),
        }
    }

    /// Drop a cached token the server refused.
    pub fn invalidate(&self) {
        if let Self::Metadata(tokens) = self {
            tokens.invalidate();
        }
    }
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Caches the metadata server token until shortly before it expires.
pub struct MetadataTokens {
    url: String,
    client: reqwest::blocking::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl MetadataTokens {
    pub fn new(host: &str) -> Result<Self, SubscriberError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(METADATA_TIMEOUT)
            .build()
            .map_err(|e| SubscriberError::HttpClient(e.to_string()))?;
        Ok(Self {
            url: format!("http://{host}{TOKEN_PATH}"),
            client,
            cached: Mutex::new(None),
        })
    }

    pub fn token(&self) -> Result<String, SubscriberError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.fetch()?;
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        tracing::debug!(expires_in = fresh.expires_in, "Fetched Pub/Sub access token");
        *cached = Some(CachedToken {
            value: fresh.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(fresh.access_token)
    }

    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn fetch(&self) -> Result<TokenResponse, SubscriberError> {
        let response = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .map_err(|e| SubscriberError::Credentials(format!("metadata server unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SubscriberError::Credentials(format!(
                "metadata server returned status {}",
                status.as_u16()
            )));
        }
        response
            .json()
            .map_err(|e| SubscriberError::Credentials(format!("invalid token response: {e}")))
    }
}
