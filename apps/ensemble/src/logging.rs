//! # Logging
//!
//! Installs the `tracing` subscriber once, at startup.
//!
//! Verbosity is a numeric level (10 debug, 20 info, 30 warning, 40 error).
//! Below 10 every discovered file is logged too.
//! `RUST_LOG`, when set, takes precedence.

use crate::error::{AppError, AppResult};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default `--verbose` level.
pub const DEFAULT_VERBOSITY: u32 = 20;

/// `--verbose` given without a value.
pub const BARE_VERBOSITY: u32 = 10;

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Map a numeric verbosity to a filter directive.
pub fn level_name(verbosity: u32) -> &'static str {
    match verbosity {
        0..10 => "trace",
        10..20 => "debug",
        20..30 => "info",
        30..40 => "warn",
        _ => "error",
    }
}

/// Whether every discovered file should be logged.
pub fn logs_every_file(verbosity: u32) -> bool {
    verbosity < BARE_VERBOSITY
}

/// Install the global subscriber.
pub fn init_logging(verbosity: u32, format: LogFormat) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_name(verbosity)));

    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init(),
    };
    result.map_err(|e| AppError::Logging(e.to_string()))?;

    tracing::info!("Logging initialized at level {}.", verbosity);
    Ok(())
}
