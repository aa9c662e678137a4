//! Logging initialization using tracing.

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::LoggingConfig;

/// Initialized logger; holds the non-blocking writer guard alive for the
/// process lifetime.
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Initialize the global subscriber from config. Stdout format follows
    /// `logging.format`; when a log directory is configured, a daily-rotated
    /// JSON file layer is added.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;
        let env_filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();

        let guard = if let Some(ref dir) = config.dir {
            let file_appender = rolling::daily(dir, "orchestrator.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);

            if config.format == "json" {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer)
                    .with(tracing_subscriber::fmt::layer().json().with_target(true))
                    .try_init()
                    .map_err(|e| anyhow!("failed to init logging: {e}"))?;
            } else {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer)
                    .with(tracing_subscriber::fmt::layer().compact().with_target(true))
                    .try_init()
                    .map_err(|e| anyhow!("failed to init logging: {e}"))?;
            }
            Some(guard)
        } else {
            let stdout_layer: Box<dyn Layer<_> + Send + Sync> = if config.format == "json" {
                Box::new(tracing_subscriber::fmt::layer().json().with_target(true))
            } else {
                Box::new(tracing_subscriber::fmt::layer().compact().with_target(true))
            };
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .try_init()
                .map_err(|e| anyhow!("failed to init logging: {e}"))?;
            None
        };

        Ok(Self { _guard: guard })
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!("unknown log level: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }
}
