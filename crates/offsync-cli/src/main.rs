//! offsync CLI
//!
//! Command-line interface for offsync - queue writes while offline, replay
//! them when the server is reachable.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use offsync_core::{Config, StorageError, SyncError};

mod commands;
mod context;
mod logging;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "offsync")]
#[command(about = "offsync - offline-first write queue and sync engine")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connectivity and queue status
    Status,
    /// Send a write to the server, or queue it when offline
    Submit {
        /// CREATE, UPDATE or DELETE (POST, PUT, PATCH accepted)
        method: String,
        /// Target path, e.g. /api/members
        path: String,
        /// JSON payload, or @file to read it from a file
        #[arg(short, long)]
        data: Option<String>,
        /// Domain kind recorded on the queue entry (default: from the path)
        #[arg(short, long)]
        kind: Option<String>,
        /// Do not create a local placeholder for a queued CREATE
        #[arg(long)]
        no_optimistic: bool,
        /// Queue without trying the server
        #[arg(long)]
        offline: bool,
    },
    /// Inspect and resolve queued operations
    Queue {
        #[command(subcommand)]
        command: Option<QueueCommands>,
    },
    /// Manage binary uploads
    Asset {
        #[command(subcommand)]
        command: AssetCommands,
    },
    /// List locally cached entities
    Entities {
        /// Only entities of this kind
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// Deliver queued work now
    Sync,
    /// Stay running: sync whenever connectivity returns (Ctrl-C to stop)
    Watch,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List every queued operation
    #[command(alias = "ls")]
    List,
    /// List operations the server refused
    Rejected,
    /// Put a failed or rejected operation back on the retry path
    Retry {
        /// Operation ID
        id: u64,
    },
    /// Drop an operation without sending it
    #[command(alias = "rm")]
    Discard {
        /// Operation ID
        id: u64,
    },
}

#[derive(Subcommand)]
enum AssetCommands {
    /// Queue a file for upload
    Add {
        /// File to upload
        file: PathBuf,
        /// MIME type (default: guessed from the extension)
        #[arg(short, long)]
        mime: Option<String>,
    },
    /// List assets waiting for upload
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, server_url, poll_interval_secs, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    if let Err(err) = run(cli, &output).await {
        eprintln!("Error: {:#}", err);
        if let Some(hint) = recovery_hint(&err) {
            eprintln!("  {}", hint);
        }
        std::process::exit(1);
    }
}

/// First recovery suggestion found along the error's cause chain
fn recovery_hint(err: &anyhow::Error) -> Option<&'static str> {
    err.chain().find_map(|cause| {
        if let Some(sync) = cause.downcast_ref::<SyncError>() {
            sync.recovery_suggestion()
        } else {
            cause
                .downcast_ref::<StorageError>()
                .and_then(StorageError::recovery_suggestion)
        }
    })
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    let config_path = cli.config.as_ref();

    // Config commands work even when the config file is broken
    if let Commands::Config { command } = &cli.command {
        return match command {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key.clone(), value.clone(), config_path, output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    logging::init(&config, matches!(cli.command, Commands::Watch));

    match cli.command {
        Commands::Status => commands::status::show(config, output).await,
        Commands::Submit {
            method,
            path,
            data,
            kind,
            no_optimistic,
            offline,
        } => {
            let args = commands::submit::SubmitArgs {
                method,
                path,
                data,
                kind,
                optimistic: !no_optimistic,
                offline,
            };
            commands::submit::submit(config, args, output).await
        }
        Commands::Queue { command } => match command {
            Some(QueueCommands::List) | None => commands::queue::list(&config, output),
            Some(QueueCommands::Rejected) => commands::queue::rejected(&config, output),
            Some(QueueCommands::Retry { id }) => commands::queue::retry(&config, id, output),
            Some(QueueCommands::Discard { id }) => commands::queue::discard(&config, id, output),
        },
        Commands::Asset { command } => match command {
            AssetCommands::Add { file, mime } => {
                commands::asset::add(config, file, mime, output).await
            }
            AssetCommands::List => commands::asset::list(&config, output),
        },
        Commands::Entities { kind } => commands::entities::list(&config, kind, output),
        Commands::Sync => commands::sync::sync(config, output).await,
        Commands::Watch => commands::watch::watch(config, output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}
