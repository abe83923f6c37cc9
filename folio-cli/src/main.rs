//! Folio CLI — grounded question answering over a local document collection.
//!
//! Provides corpus ingestion, one-shot and interactive querying, and the
//! HTTP query server.

mod commands;
mod repl;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Folio: local, grounded question answering over your PDFs
#[derive(Parser, Debug)]
#[command(name = "folio", version, about, long_about = None)]
struct Cli {
    /// Directory scanned for source documents
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory holding the persisted store
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Configuration file (replaces discovered config files)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build the corpus store from the document directory
    Ingest {
        /// Only embed and append chunks not already in the store
        #[arg(long)]
        incremental: bool,
    },
    /// Ask a one-shot question against the store
    Ask {
        /// The question (all trailing words are joined)
        question: Vec<String>,

        /// How many chunks to ground the answer on
        #[arg(long)]
        top_k: Option<usize>,

        /// Orchestration mode: off, router, consensus
        #[arg(short, long)]
        mode: Option<String>,

        /// Comma-separated chat models (priority order)
        #[arg(long)]
        models: Option<String>,

        /// Judge model for consensus mode
        #[arg(long)]
        judge_model: Option<String>,
    },
    /// Interactive question loop
    Repl {
        /// Orchestration mode: off, router, consensus
        #[arg(short, long)]
        mode: Option<String>,
    },
    /// Run the HTTP query server
    Serve {
        /// Bind host
        #[arg(long)]
        host: Option<String>,

        /// Bind port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show model service and store status
    Status,
    /// Delete and recreate the store directory
    Reset {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "folio", "folio")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "folio.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    // Load configuration
    let mut config = folio_core::config::load_config(Some(&workspace), cli.config.as_deref(), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    // Apply CLI overrides
    if let Some(data_dir) = cli.data_dir {
        config.ingest.data_dir = data_dir;
    }
    if let Some(store_dir) = cli.store_dir {
        config.ingest.store_dir = store_dir;
    }

    for warning in config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?
    {
        tracing::warn!("{warning}");
    }

    commands::handle_command(cli.command, config).await
}
