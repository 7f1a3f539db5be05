//! Logging setup shared by the snip binaries.
//!
//! Logs always go to stderr so stdout stays free for command output.

use clap::ValueEnum;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable, one event per line.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },
    #[error("failed to install global subscriber: {0}")]
    Install(String),
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_directive` when set.
pub fn init(format: LogFormat, default_directive: &str) -> Result<(), TelemetryError> {
    let filter = env_filter(default_directive)?;

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| TelemetryError::Install(e.to_string()))
}

fn env_filter(default_directive: &str) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| {
            TelemetryError::InvalidFilter {
                directive: default_directive.to_string(),
                message: e.to_string(),
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_directive() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = env_filter("snip=loud").unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidFilter { .. }));
    }

    #[test]
    fn accepts_level_and_target_directives() {
        assert!(env_filter("info").is_ok());
        assert!(env_filter("snip_shortener=debug,sqlx=warn").is_ok());
    }

    #[test]
    fn text_is_the_default_format() {
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }
}
