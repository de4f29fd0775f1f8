//! Worker configuration, read from the environment (optionally seeded
//! from a `.env` file by the binary).

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "nlp-worker";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum length of the content encryption secret.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "nlp_worker=info,tower_http=info,sqlx=warn"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(format!("expected development, production or test, got {other:?}")),
        }
    }
}

/// When the pull subscriber acknowledges a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Ack once the handler has finished: at-least-once.
    AfterProcessing,
    /// Ack as soon as the message is handed to the runtime: at-most-once.
    OnReceipt,
}

impl FromStr for AckPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "after_processing" => Ok(AckPolicy::AfterProcessing),
            "on_receipt" => Ok(AckPolicy::OnReceipt),
            other => Err(format!("expected after_processing or on_receipt, got {other:?}")),
        }
    }
}

/// Secret string that never shows up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

/// Where journal entries live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Postgres { url: Secret, max_connections: u32 },
    Sqlite { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub path: PathBuf,
    pub max_length: usize,
    pub use_token_type_ids: bool,
}

#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub enabled: bool,
    pub project_id: Option<String>,
    pub subscription_id: String,
    pub topic: String,
    pub ack_policy: AckPolicy,
    pub max_messages: u32,
    pub idle_interval: Duration,
    /// Lease length requested while a batch is being processed.
    pub ack_deadline_secs: u32,
    pub emulator_host: Option<String>,
    /// Fixed bearer token; when unset outside the emulator, tokens come
    /// from the metadata server.
    pub access_token: Option<Secret>,
    /// Metadata server host override (`GCE_METADATA_HOST`).
    pub metadata_host: Option<String>,
}

impl PubSubConfig {
    /// `projects/{project}/subscriptions/{subscription}`, when a project is set.
    pub fn subscription_path(&self) -> Option<String> {
        self.project_id
            .as_ref()
            .map(|p| format!("projects/{p}/subscriptions/{}", self.subscription_id))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub environment: Environment,
    pub bind_addr: SocketAddr,
    pub model: ModelConfig,
    pub database: DatabaseTarget,
    pub encryption_secret: Secret,
    pub pubsub: PubSubConfig,
}

impl WorkerConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let environment = parse_or(&get, "ENVIRONMENT", Environment::Development)?;

        let port: u16 = parse_or(&get, "PORT", 8080)?;
        if port == 0 {
            return Err(invalid("PORT", "must be between 1 and 65535"));
        }
        let host: IpAddr = parse_or(&get, "BIND_HOST", IpAddr::from([0, 0, 0, 0]))?;

        let model = ModelConfig {
            path: get("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("models/wellness-classifier")),
            max_length: parse_or(&get, "MODEL_MAX_LENGTH", 512)?,
            use_token_type_ids: parse_bool(&get, "MODEL_TOKEN_TYPE_IDS", false)?,
        };
        if model.max_length == 0 {
            return Err(invalid("MODEL_MAX_LENGTH", "must be positive"));
        }

        let database = database_target(&get)?;

        let secret = get("CONTENT_ENCRYPTION_KEY").ok_or(ConfigError::Missing("CONTENT_ENCRYPTION_KEY"))?;
        if secret.chars().count() < MIN_SECRET_LENGTH {
            return Err(invalid(
                "CONTENT_ENCRYPTION_KEY",
                format!("must be at least {MIN_SECRET_LENGTH} characters"),
            ));
        }

        let pubsub = PubSubConfig {
            enabled: parse_bool(&get, "PUBSUB_PULL_ENABLED", environment != Environment::Test)?,
            project_id: get("GOOGLE_CLOUD_PROJECT_ID"),
            subscription_id: get("PUBSUB_SUBSCRIPTION_ID").unwrap_or_else(|| "journal-topic-sub".into()),
            topic: get("PUBSUB_NLP_TOPIC").unwrap_or_else(|| "journal-topic".into()),
            ack_policy: parse_or(&get, "PUBSUB_ACK_POLICY", AckPolicy::AfterProcessing)?,
            max_messages: parse_or(&get, "PUBSUB_MAX_MESSAGES", 10)?,
            idle_interval: Duration::from_millis(parse_or(&get, "PUBSUB_IDLE_MS", 1000)?),
            ack_deadline_secs: parse_or(&get, "PUBSUB_ACK_DEADLINE_SECS", 60)?,
            emulator_host: get("PUBSUB_EMULATOR_HOST"),
            access_token: get("PUBSUB_ACCESS_TOKEN").map(Secret::new),
            metadata_host: get("GCE_METADATA_HOST"),
        };
        if pubsub.max_messages == 0 {
            return Err(invalid("PUBSUB_MAX_MESSAGES", "must be positive"));
        }
        if !(10..=600).contains(&pubsub.ack_deadline_secs) {
            return Err(invalid("PUBSUB_ACK_DEADLINE_SECS", "must be between 10 and 600"));
        }

        Ok(Self {
            environment,
            bind_addr: SocketAddr::new(host, port),
            model,
            database,
            encryption_secret: Secret::new(secret),
            pubsub,
        })
    }
}

fn database_target<G>(get: &G) -> Result<DatabaseTarget, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let max_connections: u32 = parse_or(get, "DB_MAX_CONNECTIONS", 5)?;
    if max_connections == 0 {
        return Err(invalid("DB_MAX_CONNECTIONS", "must be positive"));
    }

    if let Some(url) = get("DATABASE_URL") {
        if let Some(path) = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
        {
            return Ok(DatabaseTarget::Sqlite {
                path: PathBuf::from(path),
            });
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(DatabaseTarget::Postgres {
                url: Secret::new(url),
                max_connections,
            });
        }
        return Err(invalid("DATABASE_URL", "expected a postgres:// or sqlite:// URL"));
    }

    let host = get("DB_HOST").unwrap_or_else(|| "localhost".into());
    let port: u16 = parse_or(get, "DB_PORT", 5432)?;
    let user = get("DB_USER").unwrap_or_else(|| "postgres".into());
    let password = get("DB_PASSWORD").unwrap_or_default();
    let name = get("DB_NAME").unwrap_or_else(|| "nlp_worker_db".into());

    let credentials = if password.is_empty() {
        user
    } else {
        format!("{user}:{password}")
    };
    Ok(DatabaseTarget::Postgres {
        url: Secret::new(format!("postgres://{credentials}@{host}:{port}/{name}")),
        max_connections,
    })
}

fn parse_or<G, T>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| invalid(name, e.to_string())),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(name, format!("expected a boolean, got {v:?}"))),
        },
    }
}
