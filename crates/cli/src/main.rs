//! GemRelay CLI: the main entry point.
//!
//! Commands:
//! - `serve`   Start the OpenAI-compatible HTTP server
//! - `status`  Show the effective configuration and store health
//! - `init`    Write a starter config file
//! - `dump`    Print stored conversations as JSON
//! - `rotate`  Delete conversations older than a retention window

use clap::{Parser, Subcommand};
use gemrelay_config::AppConfig;
use std::path::{Path, PathBuf};

mod commands;

#[derive(Parser)]
#[command(
    name = "gemrelay",
    about = "GemRelay: OpenAI-compatible API for Gemini Web",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $GEMRELAY_CONFIG or config/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show configuration and conversation store status
    Status,

    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print stored conversations as JSON
    Dump {
        /// Conversation database directory
        path: PathBuf,

        /// Only these keys (default: every record)
        keys: Vec<String>,
    },

    /// Delete conversations older than a retention window
    Rotate {
        /// Conversation database directory
        path: PathBuf,

        /// Retention: `Nd` days, `Nh` hours, or `all`
        keep: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);

    match cli.command {
        Commands::Serve { port } => {
            let config = load_config(&config_path)?;
            init_tracing(cli.verbose, Some(&config));
            commands::serve::run(config, port).await?;
        }
        Commands::Status => {
            let config = load_config(&config_path)?;
            init_tracing(cli.verbose, Some(&config));
            commands::status::run(&config, &config_path)?;
        }
        Commands::Init { force } => {
            init_tracing(cli.verbose, None);
            commands::init::run(&config_path, force)?;
        }
        Commands::Dump { path, keys } => {
            init_tracing(cli.verbose, None);
            commands::dump::run(&path, &keys)?;
        }
        Commands::Rotate { path, keep } => {
            init_tracing(cli.verbose, None);
            commands::rotate::run(&path, &keep)?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<AppConfig, String> {
    AppConfig::load_with_env(path).map_err(|e| format!("Failed to load config: {e}"))
}

/// `RUST_LOG` wins, then `--verbose`, then the configured level.
fn init_tracing(verbose: bool, config: Option<&AppConfig>) {
    let fallback = if verbose {
        "debug"
    } else {
        config
            .and_then(|c| c.logging.filter_directive())
            .unwrap_or("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_target(false)
        .init();
}
