use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use llm_throttle::clock::SystemClock;
use llm_throttle::config::{AppConfig, LoggingConfig};
use llm_throttle::host::ConsoleHost;
use llm_throttle::ratelimit::{AdmissionEngine, LimitConfig};
use llm_throttle::store::JsonFileStore;

/// Sliding-window admission control for LLM calls.
///
/// Reads `<user_id> [group_id]` requests and `/rl` admin commands from stdin.
#[derive(Debug, Parser)]
#[command(name = "llm-throttle", version, about)]
struct Cli {
    /// Path to a YAML or JSON application config file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the limit store path
    #[arg(short, long)]
    store: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(store) = cli.store {
        config.store.path = store;
    }

    init_tracing(&config.logging);

    info!("Starting LLM Throttle");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(JsonFileStore::open(&config.store.path)?);
    let limits = LimitConfig::load(store.as_ref());
    info!(
        store = %store.path().display(),
        max_requests = limits.default_user_limit,
        window_secs = limits.window_secs(),
        "Configuration loaded"
    );

    let engine = Arc::new(AdmissionEngine::new(limits));
    info!("Admission engine initialized");

    let host = ConsoleHost::new(engine, store, Arc::new(SystemClock::new()), config.messages);

    host.run(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown_signal(),
    )
    .await?;

    info!("LLM Throttle stopped");
    Ok(())
}

/// Initialize tracing on stderr so stdout carries only replies.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
