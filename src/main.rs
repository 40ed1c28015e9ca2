//! Cache File - command-line access to a file-backed cache store

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cache_file::{spawn_cleanup_task, Config, FileConnector};

#[derive(Parser)]
#[command(name = "cache-file", version, about = "File-backed cache store")]
struct Cli {
    /// Store file path (defaults to CACHE_STORE / CACHE_FILE or store/cache.db)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value stored under a key
    Get { key: String },
    /// Store a value, optionally expiring after `ttl` seconds
    Set {
        key: String,
        value: String,
        #[arg(long, default_value_t = 0)]
        ttl: u64,
    },
    /// Report whether a live value exists
    Exists { key: String },
    /// Delete a key
    Del { key: String },
    /// Add `step` to a counter and print the result
    Incr {
        key: String,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        start: i64,
        #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
        step: i64,
        #[arg(long, default_value_t = 0)]
        ttl: u64,
    },
    /// List live keys with a prefix as JSON
    Keys {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Delete every key with a prefix
    Clear { prefix: String },
    /// Remove expired records once
    Purge,
    /// Remove expired records periodically until interrupted
    Sweep {
        /// Seconds between sweeps (defaults to CLEANUP_INTERVAL)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cache_file=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(store) = cli.store {
        config.store = store;
    }
    config
        .ensure_store_dir()
        .with_context(|| format!("creating directory for {}", config.store.display()))?;

    let connector = Arc::new(FileConnector::from_config(&config));
    connector.open()?;

    let outcome = run(cli.command, &connector, &config).await;
    connector.close()?;
    outcome
}

async fn run(command: Commands, connector: &Arc<FileConnector>, config: &Config) -> Result<()> {
    let mut stdout = std::io::stdout();

    match command {
        Commands::Get { key } => match connector.read(&key)? {
            Some(value) => {
                stdout.write_all(&value)?;
                stdout.write_all(b"\n")?;
            }
            None => info!("Miss: {}", key),
        },
        Commands::Set { key, value, ttl } => {
            connector.write(&key, value.as_bytes(), Duration::from_secs(ttl))?;
        }
        Commands::Exists { key } => writeln!(stdout, "{}", connector.exists(&key)?)?,
        Commands::Del { key } => connector.delete(&key)?,
        Commands::Incr {
            key,
            start,
            step,
            ttl,
        } => {
            let value = connector.sequence(&key, start, step, Duration::from_secs(ttl))?;
            writeln!(stdout, "{}", value)?;
        }
        Commands::Keys { prefix } => {
            let keys = connector.keys(&prefix)?;
            writeln!(stdout, "{}", serde_json::to_string(&keys)?)?;
        }
        Commands::Clear { prefix } => writeln!(stdout, "{}", connector.clear(&prefix)?)?,
        Commands::Purge => writeln!(stdout, "{}", connector.purge_expired()?)?,
        Commands::Sweep { interval } => {
            let interval = interval.unwrap_or(config.cleanup_interval);
            let handle = spawn_cleanup_task(connector.clone(), interval);
            shutdown_signal().await;
            handle.abort();
            let _ = handle.await;
            warn!("Expiry sweep aborted");
        }
    }

    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
