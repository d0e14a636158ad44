//! Hierarchical configuration loading.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::SwarmConfig;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_agents: {0}. Must be between 1 and 1000")]
    InvalidMaxAgents(usize),

    #[error("Invalid {name} threshold: {value}. Must be within (0, 1]")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("Invalid byzantine_f: 0. At least one faulty participant must be tolerated")]
    InvalidByzantineF,

    #[error(
        "Invalid Raft timers: heartbeat_interval_ms ({heartbeat}) must be less than election_timeout_ms / 2 ({election})"
    )]
    InvalidRaftTimers { heartbeat: u64, election: u64 },

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("storage_root cannot be empty")]
    EmptyStorageRoot,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Unknown default_algorithm: {0}")]
    UnknownDefaultAlgorithm(String),
}

/// Loads [`SwarmConfig`] with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .moai/config.yaml (project config)
    /// 3. .moai/local.yaml (project local overrides, optional)
    /// 4. Environment variables (MOAI_* prefix, highest priority)
    pub fn load() -> Result<SwarmConfig> {
        let config: SwarmConfig = Figment::new()
            .merge(Serialized::defaults(SwarmConfig::default()))
            .merge(Yaml::file(".moai/config.yaml"))
            .merge(Yaml::file(".moai/local.yaml"))
            .merge(Env::prefixed("MOAI_").split("__"))
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
        if config.max_agents == 0 || config.max_agents > 1000 {
            return Err(ConfigError::InvalidMaxAgents(config.max_agents));
        }

        for (name, value) in [
            ("quorum", config.quorum_threshold),
            ("weighted", config.weighted_threshold),
        ] {
            if value <= 0.0 || value > 1.0 {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }

        if config.byzantine_f == 0 {
            return Err(ConfigError::InvalidByzantineF);
        }

        if config.heartbeat_interval_ms >= config.election_timeout_ms / 2 {
            return Err(ConfigError::InvalidRaftTimers {
                heartbeat: config.heartbeat_interval_ms,
                election: config.election_timeout_ms,
            });
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.storage_root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyStorageRoot);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let known_algorithms = ["quorum", "weighted", "raft", "byzantine", "crdt"];
        if !known_algorithms.contains(&config.default_algorithm.as_str()) {
            return Err(ConfigError::UnknownDefaultAlgorithm(
                config.default_algorithm.clone(),
            ));
        }

        Ok(())
    }
}
