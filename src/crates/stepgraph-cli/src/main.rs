//! `stepgraph` - drive palette-recoloring sessions from the command line

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use stepgraph_cli::config::{ConfigLoader, LogFormat, LoggingConfig};
use stepgraph_cli::workflow::{self, Turn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stepgraph")]
#[command(about = "Run and manage palette-recoloring conversation sessions", long_about = None)]
#[command(version)]
struct Cli {
    /// Extra config file layered over user and project configs
    #[arg(long, global = true, env = "STEPGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Session directory (overrides [store] dir)
    #[arg(long, global = true, env = "STEPGRAPH_STORE_DIR")]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session, answer a waiting one, or restart a finished one
    Submit {
        /// Session id (a new one is generated when omitted)
        #[arg(short, long)]
        session: Option<String>,

        /// What the user says
        #[arg(short, long, default_value = "")]
        message: String,

        /// Image to upload with this turn
        #[arg(short, long)]
        image_file: Option<PathBuf>,
    },

    /// Show a session without running anything
    Inspect {
        session: String,
    },

    /// Choose one of the palette candidates offered in a session
    SelectPalette {
        session: String,

        /// Candidate number as listed (starting at 1)
        index: usize,
    },

    /// List stored sessions
    Sessions,

    /// Remove sessions idle for longer than the TTL
    Sweep {
        /// TTL in seconds (defaults to [store] ttl_secs)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Delete a session
    Delete {
        session: String,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().with_explicit(cli.config).load().await?;
    init_tracing(&config.logging);

    let store_dir = cli.store_dir.unwrap_or_else(|| config.store.dir.clone());
    let engine = stepgraph_cli::open_engine(&config, &store_dir).await?;
    tracing::debug!(store = %store_dir.display(), "Engine ready");

    match cli.command {
        Commands::Submit {
            session,
            message,
            image_file,
        } => {
            let image_file = match image_file {
                Some(path) if !path.is_file() => {
                    bail!("Image file not found: {}", path.display())
                }
                Some(path) => Some(path.display().to_string()),
                None => None,
            };
            let turn = Turn {
                message,
                image_file,
            };
            let result = engine.submit(session.as_deref(), turn.to_value()).await?;
            print_json(&result)?;
        }
        Commands::Inspect { session } => {
            print_json(&engine.inspect(&session).await?)?;
        }
        Commands::SelectPalette { session, index } => {
            let Some(index) = index.checked_sub(1) else {
                bail!("Palette numbers start at 1");
            };
            print_json(&workflow::select_palette(&engine, &session, index).await?)?;
        }
        Commands::Sessions => {
            print_json(&engine.list_sessions().await?)?;
        }
        Commands::Sweep { ttl } => {
            let ttl = Duration::from_secs(ttl.unwrap_or(config.store.ttl_secs));
            let removed = engine.sweep_expired(ttl).await?;
            println!("Removed {} expired session(s)", removed);
        }
        Commands::Delete { session } => {
            if engine.delete_session(&session).await? {
                println!("Deleted session {}", session);
            } else {
                println!("No session {}", session);
            }
        }
    }

    Ok(())
}
