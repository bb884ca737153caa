//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup, after the configuration is loaded.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use orchestrator_core::{CoreError, CoreResult};

/// Install the global fmt subscriber writing to stderr.
///
/// With `prefer_level` the configured `level` wins and `RUST_LOG` is only a
/// fallback for an invalid level; otherwise `RUST_LOG` wins.
pub fn init(level: &str, prefer_level: bool) -> CoreResult<()> {
    let filter = if prefer_level {
        match EnvFilter::try_new(level) {
            Ok(filter) => filter,
            Err(level_err) => EnvFilter::try_from_default_env().map_err(|env_err| {
                CoreError::config(format!(
                    "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
                ))
            })?,
        }
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .map_err(|e| CoreError::config(format!("invalid log level '{level}': {e}")))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| CoreError::config(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

/// Validate a level string.
pub fn parse_level(level: &str) -> CoreResult<LevelFilter> {
    if level.is_empty() {
        return Err(CoreError::config("log level must not be empty"));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| CoreError::config(format!("unrecognised log level: '{level}'")))
}
