//! Logging infrastructure.
//!
//! Structured logging using tracing and tracing-subscriber. The coordination
//! core logs to stdout only; log shipping and rotation belong to the host
//! process.

use anyhow::{anyhow, Result};
use std::io;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::LoggingConfig;

/// Initialize the global subscriber from config.
///
/// Honours `MOAI_LOG` as an `EnvFilter` override of the configured level.
/// Returns an error if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let default_level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var("MOAI_LOG")
        .from_env_lossy();

    match config.format.as_str() {
        "json" => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_current_span(true)
                .with_target(true)
                .with_filter(env_filter);
            tracing_subscriber::registry()
                .with(layer)
                .try_init()
                .map_err(|e| anyhow!("failed to install subscriber: {e}"))?;
        }
        _ => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(io::stdout)
                .with_target(true)
                .with_filter(env_filter);
            tracing_subscriber::registry()
                .with(layer)
                .try_init()
                .map_err(|e| anyhow!("failed to install subscriber: {e}"))?;
        }
    }

    Ok(())
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!("unknown log level '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert!(parse_log_level("verbose").is_err());
    }
}
