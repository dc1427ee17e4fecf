use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedsync_core::config::FeedConfig;
use std::path::{Path, PathBuf};

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "feedsync")]
#[command(about = "feedsync CLI - inspect and maintain a feed session store", long_about = None)]
struct Cli {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List persisted sessions with their liveness
    Sessions {
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Print the structural journal of a session
    Journal {
        #[arg(long)]
        store: Option<PathBuf>,
        /// Session id, or `$HEAD` for the head session
        session: String,
        /// Print only the surviving appends
        #[arg(long)]
        compact: bool,
    },
    /// Drop expired sessions, orphaned journals and unreferenced content
    Cleanup {
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_file.as_deref())?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Sessions { store } => {
            commands::sessions::run(&resolve_store(store)?, &config).await?
        }
        Commands::Journal {
            store,
            session,
            compact,
        } => commands::journal::run(&resolve_store(store)?, &session, compact).await?,
        Commands::Cleanup { store } => {
            commands::cleanup::run(&resolve_store(store)?, config).await?
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<FeedConfig> {
    match path {
        Some(path) => feedsync_infrastructure::load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(FeedConfig::default()),
    }
}

/// Uses `--store` if given, else `<data dir>/feedsync`.
fn resolve_store(store: Option<PathBuf>) -> Result<PathBuf> {
    match store {
        Some(store) => Ok(store),
        None => dirs::data_dir()
            .map(|dir| dir.join("feedsync"))
            .context("No --store given and no data directory on this platform"),
    }
}
