use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tether_config::{ConfigLoader, TetherConfig};
use tether_core::TetherError;

mod remote;
mod start;

/// Tether: a single-session conversational relay
#[derive(Parser)]
#[command(name = "tether", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to tether.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Start the relay (session gate, scheduler, and HTTP server)
    Start {
        /// Don't start the HTTP server
        #[arg(long)]
        no_server: bool,
    },
    /// Show the status of a running relay
    Status,
    /// Send one message through a running relay and print the replies
    Send {
        /// Message text
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    /// Review patch proposals
    Patch {
        #[command(subcommand)]
        action: PatchAction,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
enum PatchAction {
    /// List targets, the pending proposal, and history
    List,
    /// Approve a proposal and write it over its target
    Deploy { id: String },
    /// Discard a proposal
    Drop { id: String },
}

impl Cli {
    pub async fn run(self) -> tether_core::Result<()> {
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Start { no_server } => start::cmd_start(config, no_server, config_loader).await,
            Commands::Status => remote::cmd_status(&config).await,
            Commands::Send { message } => remote::cmd_send(&config, &message.join(" ")).await,
            Commands::Patch { action } => remote::cmd_patch(&config, action).await,
            Commands::Config { json } => cmd_config(&config, json),
        }
    }
}

fn init_tracing(level: &str, format: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(false)
            .init(),
    }
}

fn cmd_config(config: &TetherConfig, json: bool) -> tether_core::Result<()> {
    let rendered = if json {
        serde_json::to_string_pretty(config)?
    } else {
        toml::to_string_pretty(config).map_err(|e| TetherError::Config(e.to_string()))?
    };
    println!("{rendered}");
    Ok(())
}
