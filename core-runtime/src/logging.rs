//! # Logging Infrastructure
//!
//! `tracing-subscriber` setup shared by every binary embedding the engine.
//!
//! Supports pretty, compact, and JSON output with module-level filtering.
//! The default filter keeps workspace crates at the configured level and
//! silences chatty dependencies.

use tracing_subscriber::{filter::EnvFilter, fmt, util::SubscriberInitExt};

use crate::error::{Result, RuntimeError};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable format with colors.
    #[default]
    Pretty,
    /// Compact single-line format for production.
    Compact,
    /// Structured JSON for machine parsing.
    Json,
}

/// Minimum level for workspace crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Logging configuration, consumed once at startup.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Custom filter string (e.g. "core_sync=trace"); overrides `level`.
    pub filter: Option<String>,
    /// Display target module in log lines.
    pub display_target: bool,
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// # Errors
///
/// Fails when the filter string is invalid or a global subscriber is
/// already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(config.display_target);

    let result = match config.format {
        LogFormat::Pretty => builder.pretty().finish().try_init(),
        LogFormat::Compact => builder.compact().finish().try_init(),
        LogFormat::Json => builder.json().finish().try_init(),
    };

    result.map_err(|e| RuntimeError::Logging(e.to_string()))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let filter_string = if let Some(custom) = &config.filter {
        custom.clone()
    } else {
        let level = config.level.as_str();
        format!(
            "core_sync={},core_runtime={},bridge_traits={},tokio=warn",
            level, level, level
        )
    };

    EnvFilter::try_new(&filter_string)
        .map_err(|e| RuntimeError::InvalidFilter(format!("{}: {}", filter_string, e)))
}
