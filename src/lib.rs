pub mod api;
pub mod classifier;
pub mod config;
pub mod crypto;
pub mod db;
pub mod logging;
pub mod pipeline;
pub mod subscriber;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use classifier::{LabelTable, TextClassifier, WellnessAnalyzer};
use config::{DatabaseTarget, ModelConfig, WorkerConfig};
use crypto::ContentKey;
use db::{DatabaseError, JournalStore, PgJournalStore, SqliteJournalStore};
use pipeline::{InferenceLock, JournalEventHandler};
use subscriber::{start_subscriber, PubSubRestSubscription, SubscriberHandle, SubscriberOptions};

pub use logging::init_tracing;

/// How long shutdown waits for the pull loop; Cloud Run kills the
/// container about ten seconds after SIGTERM.
pub(crate) const SUBSCRIBER_STOP_TIMEOUT: Duration = Duration::from_secs(8);

/// Connect the journal store named by the config.
pub async fn open_store(target: &DatabaseTarget) -> Result<Arc<dyn JournalStore>, DatabaseError> {
    match target {
        DatabaseTarget::Postgres {
            url,
            max_connections,
        } => Ok(Arc::new(
            PgJournalStore::connect(url.expose(), *max_connections).await?,
        )),
        DatabaseTarget::Sqlite { path } => Ok(Arc::new(SqliteJournalStore::open(path)?)),
    }
}

#[cfg(feature = "onnx-classifier")]
fn load_classifier(model: &ModelConfig) -> Result<Box<dyn TextClassifier>, classifier::ClassifierError> {
    let classifier = classifier::OnnxClassifier::load(
        &model.path,
        model.max_length,
        model.use_token_type_ids,
    )?;
    tracing::info!(path = %model.path.display(), "Wellness classifier loaded");
    Ok(Box::new(classifier))
}

#[cfg(not(feature = "onnx-classifier"))]
fn load_classifier(_model: &ModelConfig) -> Result<Box<dyn TextClassifier>, classifier::ClassifierError> {
    Err(classifier::ClassifierError::Unavailable)
}

/// Build the event handler shared by both ingresses.
pub fn build_handler(
    config: &WorkerConfig,
    store: Arc<dyn JournalStore>,
    classifier: Box<dyn TextClassifier>,
) -> Arc<JournalEventHandler> {
    let analyzer = WellnessAnalyzer::new(classifier, LabelTable::wellness());
    let key = ContentKey::from_secret(config.encryption_secret.expose());
    Arc::new(JournalEventHandler::new(
        store,
        Arc::new(analyzer),
        Arc::new(key),
        InferenceLock::new(),
    ))
}

fn spawn_subscriber(
    config: &WorkerConfig,
    handler: Arc<JournalEventHandler>,
) -> Option<SubscriberHandle> {
    let pubsub = config.pubsub.clone();
    if !pubsub.enabled {
        tracing::info!("Pull ingress disabled");
        return None;
    }
    if pubsub.project_id.is_none() {
        tracing::warn!("GOOGLE_CLOUD_PROJECT_ID is not set; pull ingress disabled");
        return None;
    }

    tracing::info!(
        subscription = %pubsub.subscription_id,
        topic = %pubsub.topic,
        emulator = pubsub.emulator_host.is_some(),
        "Starting pull ingress"
    );
    let options = SubscriberOptions::from_config(&pubsub);
    Some(start_subscriber(
        move || PubSubRestSubscription::from_config(&pubsub),
        handler,
        tokio::runtime::Handle::current(),
        options,
    ))
}

/// Run the worker until Ctrl-C or SIGTERM.
pub async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    tracing::info!(
        version = config::APP_VERSION,
        environment = %config.environment,
        "{} starting",
        config::APP_NAME
    );

    let store = open_store(&config.database).await?;
    let classifier = load_classifier(&config.model)?;
    let handler = build_handler(&config, store, classifier);

    let subscriber = spawn_subscriber(&config, handler.clone());

    let ctx = api::ApiContext::new(handler, config.environment);
    let server = api::start_http_server(ctx, config.bind_addr).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown requested");

    server.stop().await;
    if let Some(subscriber) = subscriber {
        stop_subscriber(subscriber, SUBSCRIBER_STOP_TIMEOUT).await;
    }

    tracing::info!("{} stopped", config::APP_NAME);
    Ok(())
}

/// Join the pull loop, giving up after `budget`. Unsettled messages are
/// redelivered once their leases lapse.
async fn stop_subscriber(subscriber: SubscriberHandle, budget: Duration) -> bool {
    let join = tokio::task::spawn_blocking(move || subscriber.stop());
    match tokio::time::timeout(budget, join).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Subscriber shutdown task failed");
            false
        }
        Err(_) => {
            tracing::warn!(
                budget_secs = budget.as_secs(),
                "Subscriber did not stop in time; in-flight messages will be redelivered"
            );
            false
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::classifier::WellnessState;
    use crate::crypto::{ContentKey, EncryptedBlob};
    use crate::pipeline::{JournalEvent, Outcome};
    use crate::testing::FixedClassifier;

    fn config_with(vars: &[(&str, &str)]) -> WorkerConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|name| map.get(name).cloned()).unwrap()
    }

    #[tokio::test]
    async fn sqlite_store_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("journal.db");
        let secret = "an-end-to-end-content-secret-0123456789";
        let config = config_with(&[
            ("ENVIRONMENT", "test"),
            ("CONTENT_ENCRYPTION_KEY", secret),
            ("DATABASE_URL", &format!("sqlite://{}", db_path.display())),
        ]);

        let sqlite = Arc::new(SqliteJournalStore::open(&db_path).unwrap());
        let blob = EncryptedBlob::encrypt(&ContentKey::from_secret(secret), "A long quiet evening.").unwrap();
        sqlite.insert_journal("j1", "u1", &blob).unwrap();

        let store = open_store(&config.database).await.unwrap();
        let classifier = FixedClassifier::cycling(vec![vec![0.0, 3.0, 1.0, -2.0, 0.5]]);
        let handler = build_handler(&config, store, Box::new(classifier));

        let outcome = handler
            .handle_event(JournalEvent::journal_created("u1", "j1"))
            .await
            .unwrap();
        let Outcome::Processed(state) = outcome else {
            panic!("expected processed outcome");
        };
        assert_eq!(state.top().map(|s| s.label.as_str()), Some("Normal"));

        let stored: WellnessState = sqlite.wellness_state("j1", "u1").unwrap().unwrap();
        assert_eq!(stored, state);
    }

    #[cfg(feature = "onnx-classifier")]
    #[test]
    fn missing_model_directory_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let model = ModelConfig {
            path: dir.path().join("absent"),
            max_length: 128,
            use_token_type_ids: false,
        };
        let err = load_classifier(&model).err().unwrap();
        assert!(matches!(err, classifier::ClassifierError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn disabled_pull_ingress_is_not_started() {
        let config = config_with(&[
            ("ENVIRONMENT", "test"),
            ("CONTENT_ENCRYPTION_KEY", "x".repeat(40).as_str()),
        ]);
        assert!(!config.pubsub.enabled);
        let handler = crate::testing::test_handler(crate::testing::seeded_store());
        assert!(spawn_subscriber(&config, handler).is_none());
    }

    /// Every pull blocks for the given time and returns nothing.
    struct SlowPull(Duration);

    impl subscriber::Subscription for SlowPull {
        fn pull(&self, _max: u32) -> Result<Vec<subscriber::ReceivedMessage>, subscriber::SubscriberError> {
            std::thread::sleep(self.0);
            Ok(Vec::new())
        }

        fn ack(&self, _ids: &[String]) -> Result<(), subscriber::SubscriberError> {
            Ok(())
        }

        fn nack(&self, _ids: &[String]) -> Result<(), subscriber::SubscriberError> {
            Ok(())
        }

        fn extend(&self, _ids: &[String], _seconds: u32) -> Result<(), subscriber::SubscriberError> {
            Ok(())
        }
    }

    fn stop_options() -> SubscriberOptions {
        SubscriberOptions {
            ack_policy: config::AckPolicy::AfterProcessing,
            max_messages: 1,
            idle_interval: Duration::from_millis(10),
            ack_deadline_secs: 60,
            lease_refresh: Duration::from_secs(30),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_gives_up_on_a_stuck_pull() {
        let handle = start_subscriber(
            || Ok(SlowPull(Duration::from_millis(1500))),
            crate::testing::test_handler(crate::testing::seeded_store()),
            tokio::runtime::Handle::current(),
            stop_options(),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        assert!(!stop_subscriber(handle, Duration::from_millis(100)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_joins_an_idle_subscriber() {
        let handle = start_subscriber(
            || Ok(SlowPull(Duration::from_millis(10))),
            crate::testing::test_handler(crate::testing::seeded_store()),
            tokio::runtime::Handle::current(),
            stop_options(),
        );
        assert!(stop_subscriber(handle, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn pull_ingress_requires_project() {
        let config = config_with(&[
            ("ENVIRONMENT", "development"),
            ("PUBSUB_PULL_ENABLED", "true"),
            ("CONTENT_ENCRYPTION_KEY", "x".repeat(40).as_str()),
        ]);
        let handler = crate::testing::test_handler(crate::testing::seeded_store());
        assert!(spawn_subscriber(&config, handler).is_none());
    }
}
