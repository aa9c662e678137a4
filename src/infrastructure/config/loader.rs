//! Configuration loading with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_agents: {0}. Must be between 1 and 100")]
    InvalidMaxAgents(u32),

    #[error("Database URL cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Invalid event_retention: {0}. Must be at least 1")]
    InvalidEventRetention(usize),

    #[error("Invalid stale_threshold_ms: {0}. Must be positive")]
    InvalidStaleThreshold(u64),

    #[error("Invalid budget: daily {daily} / monthly {monthly}. Must be positive and daily <= monthly")]
    InvalidBudget { daily: f64, monthly: f64 },

    #[error("Invalid review_max_iter: {0}. Cannot be 0")]
    InvalidReviewMaxIter(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid subscriber_queue_cap: {0}. Must be at least 1")]
    InvalidSubscriberQueueCap(usize),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .orchestrator/config.yaml (project config)
    /// 3. .orchestrator/local.yaml (project local overrides, optional)
    /// 4. Environment variables (ORCH_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".orchestrator/config.yaml"))
            .merge(Yaml::file(".orchestrator/local.yaml"))
            .merge(Env::prefixed("ORCH_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("ORCH_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_agents == 0 || config.max_agents > 100 {
            return Err(ConfigError::InvalidMaxAgents(config.max_agents));
        }
        if config.db_url.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if config.event_retention == 0 {
            return Err(ConfigError::InvalidEventRetention(config.event_retention));
        }
        if config.stale_threshold_ms == 0 {
            return Err(ConfigError::InvalidStaleThreshold(config.stale_threshold_ms));
        }
        if config.daily_budget_usd <= 0.0
            || config.monthly_budget_usd <= 0.0
            || config.daily_budget_usd > config.monthly_budget_usd
        {
            return Err(ConfigError::InvalidBudget {
                daily: config.daily_budget_usd,
                monthly: config.monthly_budget_usd,
            });
        }
        if config.review_max_iter == 0 {
            return Err(ConfigError::InvalidReviewMaxIter(config.review_max_iter));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.events.subscriber_queue_cap == 0 {
            return Err(ConfigError::InvalidSubscriberQueueCap(
                config.events.subscriber_queue_cap,
            ));
        }
        Ok(())
    }
}
