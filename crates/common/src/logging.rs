//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Parse a level or `EnvFilter` directive list such as `info,transport=debug`
pub fn validate_filter(directives: &str) -> crate::Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| crate::Error::Config(format!("Invalid log filter '{}': {}", directives, e)))
}

/// Build a filter from `RUST_LOG`, falling back to `default_level`
///
/// `default_level` is validated even when `RUST_LOG` takes precedence.
pub fn parse_filter(default_level: &str) -> crate::Result<EnvFilter> {
    let fallback = validate_filter(default_level)?;
    Ok(EnvFilter::try_from_default_env().unwrap_or(fallback))
}

/// Setup tracing subscriber for the application
///
/// Logs go to stderr; stdout is reserved for command output.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = parse_filter(default_level)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Logging already initialized: {}", e)))?;

    Ok(())
}
