//! logsync CLI
//!
//! Command-line client for paginated, append-only remote message logs.
//!
//! # Commands
//!
//! - `fetch` - Print the first page of a collection
//! - `watch` - Follow a collection, printing new messages as they arrive
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::settings::{build_config, FileConfig, QueryArgs};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// logsync command-line client.
#[derive(Parser)]
#[command(name = "logsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the remote API
    #[arg(global = true, short, long)]
    base_url: Option<String>,

    /// JSON config file (limit, order, encoding, pollIntervalMs, cacheTimeoutMs)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the first page of a collection
    Fetch {
        /// Collection id
        collection: String,

        #[command(flatten)]
        query: QueryArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Follow a collection until Ctrl-C
    Watch {
        /// Collection id
        collection: String,

        #[command(flatten)]
        query: QueryArgs,

        /// Older pages to load after the first one
        #[arg(short, long, default_value = "0")]
        pages: u32,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let file = cli.config.as_deref().map(FileConfig::load).transpose()?;

    match cli.command {
        Commands::Fetch {
            collection,
            query,
            format,
        } => {
            let config = build_config(cli.base_url.as_deref(), file.as_ref(), &query)?;
            commands::fetch::run(&config, &collection, &format).await?;
        }
        Commands::Watch {
            collection,
            query,
            pages,
        } => {
            let config = build_config(cli.base_url.as_deref(), file.as_ref(), &query)?;
            commands::watch::run(config, &collection, pages).await?;
        }
        Commands::Version => {
            println!("logsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("logsync engine v{}", logsync_engine::VERSION);
        }
    }

    Ok(())
}
