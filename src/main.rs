//! nlp-worker: classifies journal entries as they are published.

use clap::Parser;

use nlp_worker::config::WorkerConfig;

/// Journal wellness classification worker.
#[derive(Parser, Debug)]
#[command(name = "nlp-worker")]
#[command(about = "Classifies encrypted journal entries delivered over Pub/Sub", long_about = None)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    let config = WorkerConfig::from_env()?;
    nlp_worker::init_tracing(config.environment);

    nlp_worker::run(config).await
}
