//! Log setup: stderr plus a daily file under `~/.mindful/logs`.
//!
//! `RUST_LOG` controls the filter (default `info`). `MINDFUL_DEBUG_LOG=1`
//! forces `debug` regardless.

use std::env;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "mindful-sim.log";

/// Keep the returned guard alive for the life of the process or buffered
/// file output is lost.
pub fn init() -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let registry = tracing_subscriber::registry()
        .with(filter())
        .with(stderr_layer);

    match log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var("MINDFUL_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn log_dir() -> Option<PathBuf> {
    let dir = dirs::home_dir()?.join(".mindful").join("logs");
    // File logging is optional; stderr still works without it.
    fs_err::create_dir_all(&dir).ok()?;
    Some(dir)
}
