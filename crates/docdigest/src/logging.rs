//! Tracing subscriber setup.
//!
//! `RUST_LOG` controls filtering (default `info`). Output is compact text, or
//! one JSON object per line when `DOCDIGEST_LOG_FORMAT=json`. Records emitted
//! through the `log` macros are forwarded into the same subscriber.

use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

pub const LOG_FORMAT_ENV: &str = "DOCDIGEST_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// Unknown values fall back to compact output.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }

    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to bridge log records: {0}")]
    LogBridge(#[from] log::SetLoggerError),

    #[error("A global tracing subscriber is already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs the global subscriber. Call once, early in `main`.
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with(LogFormat::from_env())
}

pub fn init_logging_with(format: LogFormat) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = match format {
        LogFormat::Compact => fmt::layer().with_target(false).compact().boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter);

    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
