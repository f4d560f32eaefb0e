//! cfenv CLI
//!
//! Command-line access to env snapshots stored in Cloudflare Workers KV.
//!
//! # Commands
//!
//! - `export` - Fetch the current snapshot as `.env` lines or JSON
//! - `watch` - Poll for changes and log every update
//! - `history` - List published versions or show flat metadata
//! - `checksum` - Compute the checksum of a local `.env` file
//! - `doctor` - Check the API token and the remote snapshot

mod commands;

use cfenv_sync::{CfenvClient, ClientConfig, StorageMode};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Checksum-verified env snapshots from Cloudflare Workers KV.
#[derive(Parser)]
#[command(name = "cfenv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: Connection,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Remote target. Every flag falls back to its `CFENV_*` variable.
#[derive(Args)]
struct Connection {
    /// Cloudflare account ID
    #[arg(global = true, long, env = "CFENV_ACCOUNT_ID", hide_env_values = true)]
    account_id: Option<String>,

    /// API token
    #[arg(global = true, long, env = "CFENV_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// KV namespace ID
    #[arg(global = true, long, env = "CFENV_NAMESPACE_ID")]
    namespace_id: Option<String>,

    /// Project name
    #[arg(global = true, long, env = "CFENV_PROJECT")]
    project: Option<String>,

    /// Environment name
    #[arg(global = true, short, long, env = "CFENV_ENVIRONMENT")]
    environment: Option<String>,

    /// Key prefix
    #[arg(global = true, long, env = "CFENV_KEY_PREFIX")]
    key_prefix: Option<String>,

    /// API base URL
    #[arg(global = true, long, env = "CFENV_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Storage mode: flat or snapshot
    #[arg(global = true, long, env = "CFENV_STORAGE_MODE")]
    mode: Option<StorageMode>,

    /// Secret for encrypted snapshot-mode versions
    #[arg(global = true, long, env = "CFENV_ENCRYPTION_KEY", hide_env_values = true)]
    encryption_key: Option<String>,
}

impl Connection {
    /// Builds the client configuration: `CFENV_*` tuning variables first,
    /// then the flags.
    fn into_config(self) -> cfenv_sync::CfenvResult<ClientConfig> {
        let mut config = ClientConfig::from_env()?;
        if let Some(v) = self.account_id {
            config.account_id = v;
        }
        if let Some(v) = self.api_token {
            config.api_token = v;
        }
        if let Some(v) = self.namespace_id {
            config.namespace_id = v;
        }
        if let Some(v) = self.project {
            config.project = v;
        }
        if let Some(v) = self.environment {
            config.environment = v;
        }
        if let Some(v) = self.key_prefix {
            config.key_prefix = v;
        }
        if let Some(v) = self.api_base_url {
            config = config.with_api_base_url(v);
        }
        if let Some(v) = self.mode {
            config = config.with_storage_mode(v);
        }
        if let Some(v) = self.encryption_key {
            config = config.with_encryption_key(v);
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the current snapshot once
    Export {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = commands::export::Format::Dotenv)]
        format: commands::export::Format,

        /// Write to this file (atomically, mode 0600) instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export this snapshot-mode version instead of the current one
        #[arg(long, value_name = "VERSION_ID")]
        snapshot_version: Option<String>,
    },

    /// Show what has been published
    History {
        /// Maximum number of versions to list
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Poll for changes until interrupted
    Watch {
        /// Polling interval in seconds
        #[arg(long, default_value = "30")]
        interval: f64,

        /// Maximum polling interval under failure, in seconds
        #[arg(long, default_value = "300")]
        max_interval: f64,

        /// Wait one interval before the first fetch
        #[arg(long)]
        no_bootstrap: bool,
    },

    /// Print the checksum of a local .env file
    Checksum {
        /// Path to the .env file
        file: PathBuf,

        /// Also print the canonical form
        #[arg(long)]
        canonical: bool,
    },

    /// Check the API token and the remote snapshot
    Doctor,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; stdout carries command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Export {
            format,
            output,
            snapshot_version,
        } => {
            let client = CfenvClient::new(cli.connection.into_config()?)?;
            commands::export::run(
                &client,
                format,
                output.as_deref(),
                snapshot_version.as_deref(),
            )?;
        }
        Commands::History { limit } => {
            let client = CfenvClient::new(cli.connection.into_config()?)?;
            commands::history::run(&client, limit)?;
        }
        Commands::Watch {
            interval,
            max_interval,
            no_bootstrap,
        } => {
            let client = CfenvClient::new(cli.connection.into_config()?)?;
            let config = commands::watch::hot_update_config(interval, max_interval, !no_bootstrap)?;
            commands::watch::run(&client, config)?;
        }
        Commands::Checksum { file, canonical } => {
            commands::checksum::run(&file, canonical)?;
        }
        Commands::Doctor => {
            let client = CfenvClient::new(cli.connection.into_config()?)?;
            commands::doctor::run(&client)?;
        }
    }

    Ok(())
}
