//! `tracing` subscriber setup.
//!
//! `RUST_LOG` wins over the configured level, matching the usual
//! `EnvFilter` convention.

use tracing_subscriber::EnvFilter;

use crate::{ConfigError, LoggingConfig};

/// Parse a filter directive such as `info` or `agentflow_agent=debug`.
pub fn parse_filter(directive: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(directive)
        .map_err(|e| ConfigError::ValidationError(format!("invalid logging.level '{directive}': {e}")))
}

/// Install the global fmt subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(&config.level)?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ConfigError::LoggingError(e.to_string()))
}
