//! Diagnostic logging for the `ignis` binary.
//!
//! Results go to stdout; log events go to stderr. `RUST_LOG`, when set,
//! overrides `--log-level`.

use clap::ValueEnum;
use std::fmt;
use tracing::debug;
use tracing_subscriber::{fmt as tfmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Multi-line, human-readable
    Pretty,
    /// One line per event
    Compact,
    /// Machine-readable
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Compact => write!(f, "compact"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

fn filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(level: LogLevel, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(filter(level));
    let layer = tfmt::layer().with_writer(std::io::stderr).with_target(false);

    let result = match format {
        LogFormat::Pretty => tracing::subscriber::set_global_default(registry.with(layer.pretty())),
        LogFormat::Compact => tracing::subscriber::set_global_default(registry.with(layer.compact())),
        LogFormat::Json => tracing::subscriber::set_global_default(registry.with(layer.json())),
    };

    if let Err(e) = result {
        debug!(error = %e, "keeping the subscriber installed earlier");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names_parse_as_filters() {
        for level in LogLevel::value_variants() {
            assert!(EnvFilter::try_new(level.to_string()).is_ok());
        }
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_format_names_match_cli_values() {
        for format in LogFormat::value_variants() {
            let name = format.to_possible_value().unwrap();
            assert_eq!(name.get_name(), format.to_string());
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(LogLevel::Error, LogFormat::Compact);
        init_logging(LogLevel::Debug, LogFormat::Json);
    }
}
