use std::io;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigError, LogConfig};

/// Installs the global subscriber. Logs go to stderr; `RUST_LOG` takes
/// precedence over the configured level.
pub fn init(config: &LogConfig) -> Result<(), ConfigError> {
    let level = parse_level(&config.level)?;

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(io::stderr).with_target(false))
            .try_init()
    };

    installed.map_err(|e| ConfigError::Logger(e.to_string()))
}

fn parse_level(level: &str) -> Result<LevelFilter, ConfigError> {
    level
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| ConfigError::LogLevel(level.to_string()))
}
