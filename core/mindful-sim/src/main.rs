//! mindful-sim: runs meditation sessions against synthetic sensors.
//!
//! ## Subcommands
//!
//! - `run`: Track a session for a fixed time, standalone or as a paired
//!   collector/display over an in-process link
//! - `history`: List stored sessions

mod history;
mod logging;
mod run;
mod synthetic;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mindful_core::storage::default_store_path;
use mindful_core::{load_config, JsonSessionStore, SessionConfig};

use run::{RunOptions, SimError};

#[derive(Parser)]
#[command(name = "mindful-sim")]
#[command(about = "Biometric meditation session simulator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track one simulated session
    Run {
        /// Run a collector and a display device linked over loopback
        #[arg(long)]
        pair: bool,

        /// How long to track before stopping
        #[arg(long, default_value_t = 30)]
        seconds: u64,

        /// Session config (defaults to ~/.mindful/session.toml)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Session history file (defaults to ~/.mindful/sessions.json)
        #[arg(long, value_name = "PATH")]
        store: Option<PathBuf>,

        /// Share of live sensor pushes to drop (0.0 - 1.0)
        #[arg(long, default_value_t = 0.1)]
        drop_rate: f64,

        /// Simulate the user refusing sensor access
        #[arg(long)]
        deny: bool,
    },

    /// List stored sessions, newest first
    History {
        /// Session history file (defaults to ~/.mindful/sessions.json)
        #[arg(long, value_name = "PATH")]
        store: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            pair,
            seconds,
            config,
            store,
            drop_rate,
            deny,
        } => match store.or_else(default_store_path) {
            Some(store_path) => {
                run::run(RunOptions {
                    pair,
                    seconds,
                    config: session_config(config),
                    store_path,
                    drop_rate,
                    deny,
                })
                .await
            }
            None => Err(SimError::Store(mindful_core::StoreError::NoPath)),
        },
        Commands::History { store } => match store.or_else(default_store_path) {
            Some(path) => history::print(
                &JsonSessionStore::new(&path),
                &session_config(None).baselines,
            ),
            None => Err(SimError::Store(mindful_core::StoreError::NoPath)),
        },
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "mindful-sim failed");
        std::process::exit(1);
    }
}

/// A broken config file is reported and replaced with defaults.
fn session_config(path: Option<PathBuf>) -> SessionConfig {
    match load_config(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Using default session config");
            SessionConfig::default()
        }
    }
}
