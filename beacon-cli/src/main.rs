//! Beacon CLI - watch an organization's realtime channel from the terminal.
//!
//! Useful for headless debugging of the realtime backend: it signs a session
//! into an organization, keeps the channel up, and prints every change
//! notification and broadcast event it receives.

mod commands;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use beacon_core::config::{AppConfig, ConfigHandle};
use beacon_core::error::BeaconResult;
use beacon_core::logging;

/// Beacon - realtime change feed client.
#[derive(Parser)]
#[command(
    name = "beacon",
    version,
    about = "Beacon realtime channel CLI",
    long_about = "A command-line client for the Beacon realtime channel.\n\
                   Opens a ticket-authenticated channel scoped to an organization and prints \
                   every change notification and broadcast it receives."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join an organization's realtime channel and print inbound messages.
    Listen {
        /// Organization id to scope the channel to.
        #[arg(long)]
        org: String,
        /// User id for the session.
        #[arg(long, default_value = "cli")]
        user: String,
        /// Print one JSON object per line instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Show the effective realtime configuration.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Manage the cached bearer token.
    Token {
        #[command(subcommand)]
        action: commands::token::TokenAction,
    },
}

fn load_config(path: Option<&Path>) -> BeaconResult<(AppConfig, Option<PathBuf>)> {
    let (mut config, path) = match path {
        Some(p) => (AppConfig::load_from_file(p)?, Some(p.to_path_buf())),
        None => AppConfig::load_default()?,
    };
    config.apply_env_overrides();
    Ok((config, path))
}

#[tokio::main]
async fn main() -> BeaconResult<()> {
    let cli = Cli::parse();

    let (config, config_path) = load_config(cli.config.as_deref().map(Path::new))?;

    // Initialize logging
    let log_level = if cli.verbose { "debug".to_string() } else { config.logging.level.clone() };
    let log_dir = config.effective_log_dir().unwrap_or_else(|_| PathBuf::from("logs"));
    let _guard = match logging::init_logging(&log_level, &log_dir, config.logging.json_output) {
        Ok(guard) => Some(guard),
        Err(e) => {
            logging::init_console_logging(&log_level);
            warn!("file logging unavailable ({e}), logging to console only");
            None
        }
    };

    info!("Beacon CLI v{}", beacon_core::constants::APP_VERSION);

    let config_handle = ConfigHandle::new(config);

    // Dispatch to command handlers
    match cli.command {
        Commands::Listen { org, user, json } => {
            commands::listen::run(config_handle, org, user, json).await
        }
        Commands::Status { json } => {
            commands::status::run(config_handle, config_path, json).await
        }
        Commands::Token { action } => {
            commands::token::run(config_handle, action).await
        }
    }
}
