use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::harvest::config::LoggingConfig;

fn build_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber: stderr plus an append-only log file.
/// `RUST_LOG` takes precedence over the configured filter.
pub fn init(cfg: &LoggingConfig) {
    let (file_layer, file_error) = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cfg.file)
    {
        Ok(file) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            ),
            None,
        ),
        Err(err) => (None, Some(err)),
    };

    let installed = tracing_subscriber::registry()
        .with(build_filter(&cfg.filter))
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(file_layer)
        .try_init();

    if installed.is_ok()
        && let Some(err) = file_error
    {
        warn!("could not open log file {}: {err}; logging to stderr only", cfg.file);
    }
}

