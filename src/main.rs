use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use rust_pubsub_db::config::Config;
use rust_pubsub_db::server::serve;
use rust_pubsub_db::shutdown::Shutdown;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// Main entry point for the rust_pubsub_db server.
///
/// This function:
/// 1. Parses command-line arguments for the listen address and tunables
/// 2. Initializes structured logging with tracing
/// 3. Starts the TCP server and serves connections until a `stop` command
///    or ctrl-c raises the shutdown signal
/// 4. Waits (bounded) for every worker to drain before exiting
///
/// # Arguments
/// - `--listen ADDR`: TCP address to bind to (default: 127.0.0.1:7777)
/// - `--batch-size ROWS`: rows per wire chunk when paginating results
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let matches = Command::new("rust_pubsub_db")
        .about("Tiny in-memory pub/sub DB with SQL-ish commands, live subscriptions, and framed TCP")
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .default_value("127.0.0.1:7777")
                .help("Listen address for the TCP server"),
        )
        .arg(
            Arg::new("batch")
                .long("batch-size")
                .value_name("ROWS")
                .default_value("100")
                .help("Rows per wire chunk when paginating result sets"),
        )
        .get_matches();

    let listen = matches
        .get_one::<String>("listen")
        .map(String::to_string)
        .unwrap_or_default();
    let batch: usize = matches
        .get_one::<String>("batch")
        .map(String::as_str)
        .unwrap_or("100")
        .parse()
        .context("--batch-size must be a positive integer")?;

    // Initialize structured logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Arc::new(Config {
        data_batch_size: batch.max(1),
        ..Config::default()
    });
    let shutdown = Shutdown::new();

    // ctrl-c raises the same signal a client `stop` command does
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal.quit();
        }
    });

    serve(&listen, config.clone(), shutdown.clone()).await?;

    // serve returns once the signal is raised; drain the workers
    shutdown.quit();
    if !shutdown.wait(config.shutdown_wait).await {
        warn!("shutdown timed out waiting for workers to drain");
    }
    info!("stopped");
    Ok(())
}
