//! HPC Config Push - Main entry point
//!
//! Pushes a configuration environment to its configured destination.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hpc_config_push::{config::Config, utils, Backend};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "/etc/hpc-config/push.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List environments available at the destination
    List {
        /// Print the result as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Push the environment to the destination
    Push,

    /// Fetch the environment back from the destination
    Pull,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting hpc-config-push v{} (environment: {}, mode: {})",
        env!("CARGO_PKG_VERSION"),
        config.environment.name,
        config.mode.as_str()
    );

    let cancel = CancellationToken::new();
    let signal_watcher = utils::shutdown::cancel_on_signal(cancel.clone());

    let backend = Backend::from_config(&config, cancel.clone()).await?;

    let outcome = match args.command {
        Command::List { json } => backend.list().await.map(|groups| {
            if json {
                match serde_json::to_string_pretty(&groups) {
                    Ok(text) => println!("{}", text),
                    Err(e) => tracing::error!("Failed to serialize list result: {}", e),
                }
            }
        }),
        Command::Push => backend.upload().await.map(|_| ()),
        Command::Pull => backend.download().await,
    };

    // Stop the signal watcher
    cancel.cancel();
    if let Err(e) = signal_watcher.await {
        tracing::debug!("Signal watcher ended abnormally: {}", e);
    }

    outcome.with_context(|| format!("{} backend failed", backend.name()))
}
