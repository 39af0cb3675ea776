//! # Logging Setup
//!
//! Installs the global `tracing` subscriber used by the relay binaries: an
//! `EnvFilter`, a console layer, and optionally a JSON file layer written
//! through a daily rolling, non-blocking appender.

use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// # Setup Logging
///
/// `level` is an `EnvFilter` directive (the binaries read it from `RUST_LOG`
/// through their settings); an invalid directive falls back to `info`. When
/// `log_dir` is given the directory is created and JSON lines go to
/// `<log_dir>/<file_prefix>.<date>`.
///
/// The returned guard flushes the file layer when dropped and must be held for
/// the lifetime of the process.
///
/// # Errors
/// Fails when the log directory cannot be created or a global subscriber is
/// already installed.
pub fn setup_logging(level: &str, log_dir: Option<&Path>, file_prefix: &str) -> io::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let (writer, guard) = non_blocking(rolling::daily(dir, file_prefix));
            let layer = fmt::layer().with_ansi(false).with_writer(writer).json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    tracing::info!(level, log_dir = ?log_dir, "Logging initialized");
    Ok(guard)
}
