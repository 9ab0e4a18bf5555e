//! Configuration loader with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::SwarmConfig;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid max_concurrent_agents: {0}. Must be at least 1")]
    InvalidMaxConcurrentAgents(usize),

    #[error("invalid pool bounds: min_agents {0} must not exceed max_agents {1}")]
    InvalidPoolBounds(usize, usize),

    #[error("invalid judge_pass_threshold: {0}. Must be in (0, 1]")]
    InvalidPassThreshold(f64),

    #[error("invalid checkpoint_interval_ms: {0}. Must be at least 1000")]
    InvalidCheckpointInterval(u64),

    #[error("invalid agent_timeout_ms: {0}. Must be at least 1000")]
    InvalidAgentTimeout(u64),

    #[error("invalid max_checkpoints_per_session: {0}. Must be at least 1")]
    InvalidMaxCheckpoints(usize),

    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("checkpoint_dir cannot be empty")]
    EmptyCheckpointDir,
}

/// Loads [`SwarmConfig`] with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .meshseeks/config.yaml (project config)
    /// 3. .meshseeks/local.yaml (project local overrides, optional)
    /// 4. Environment variables (MESHSEEKS_* prefix)
    pub fn load() -> Result<SwarmConfig> {
        let config: SwarmConfig = Figment::new()
            .merge(Serialized::defaults(SwarmConfig::default()))
            .merge(Yaml::file(".meshseeks/config.yaml"))
            .merge(Yaml::file(".meshseeks/local.yaml"))
            .merge(Env::prefixed("MESHSEEKS_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<SwarmConfig> {
        let config: SwarmConfig = Figment::new()
            .merge(Serialized::defaults(SwarmConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &SwarmConfig) -> Result<(), ConfigError> {
        if config.max_concurrent_agents == 0 {
            return Err(ConfigError::InvalidMaxConcurrentAgents(
                config.max_concurrent_agents,
            ));
        }
        if config.pool.min_agents > config.pool.max_agents || config.pool.max_agents == 0 {
            return Err(ConfigError::InvalidPoolBounds(
                config.pool.min_agents,
                config.pool.max_agents,
            ));
        }
        if !(config.judge_pass_threshold > 0.0 && config.judge_pass_threshold <= 1.0) {
            return Err(ConfigError::InvalidPassThreshold(config.judge_pass_threshold));
        }
        if config.checkpoint_interval_ms < 1_000 {
            return Err(ConfigError::InvalidCheckpointInterval(
                config.checkpoint_interval_ms,
            ));
        }
        if config.agent_timeout_ms < 1_000 {
            return Err(ConfigError::InvalidAgentTimeout(config.agent_timeout_ms));
        }
        if config.max_checkpoints_per_session == 0 {
            return Err(ConfigError::InvalidMaxCheckpoints(
                config.max_checkpoints_per_session,
            ));
        }
        if config.checkpoint_dir.is_empty() {
            return Err(ConfigError::EmptyCheckpointDir);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        Ok(())
    }
}
