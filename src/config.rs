//! Configuration management for proofwork
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::cli::{Cli, Commands};
use crate::error::{ProofworkError, Result};
use crate::scoring::FRAMEWORK_IDS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for proofwork
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Data directory; the platform data dir when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,
    /// What gets recorded and how it is scored
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    19200
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Session tracking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Persist milestones supplied when a session ends
    #[serde(default = "default_true")]
    pub milestone_tracking: bool,
    /// Framework used to score evaluations (space, raw)
    #[serde(default = "default_framework")]
    pub evaluation_framework: String,
    /// Sign seals with the local keystore
    #[serde(default = "default_true")]
    pub signing: bool,
}

fn default_true() -> bool {
    true
}

fn default_framework() -> String {
    "space".to_string()
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            milestone_tracking: true,
            evaluation_framework: default_framework(),
            signing: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON-formatted logs
    #[serde(default)]
    pub json_format: bool,
    /// Log file path (if None, STDERR only)
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

/// Default config file location in the platform config directory.
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "proofwork", "proofwork")
        .map(|dirs| dirs.config_dir().join("config.yaml"))
        .unwrap_or_else(|| PathBuf::from("proofwork.yaml"))
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProofworkError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ProofworkError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(dir) = std::env::var("PROOFWORK_DATA_DIR") {
            tracing::debug!(data_dir = %dir, "Env override: PROOFWORK_DATA_DIR");
            self.data_dir = Some(PathBuf::from(dir));
        }

        if let Ok(host) = std::env::var("PROOFWORK_HOST") {
            tracing::debug!(host = %host, "Env override: PROOFWORK_HOST");
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("PROOFWORK_PORT") {
            match port.parse::<u16>() {
                Ok(v) => {
                    self.server.port = v;
                    tracing::debug!(port = v, "Env override: PROOFWORK_PORT");
                }
                Err(_) => tracing::warn!("Invalid value for PROOFWORK_PORT: {}", port),
            }
        }

        if let Some(v) = env_bool("PROOFWORK_MILESTONE_TRACKING") {
            self.tracking.milestone_tracking = v;
        }

        if let Ok(framework) = std::env::var("PROOFWORK_FRAMEWORK") {
            tracing::debug!(framework = %framework, "Env override: PROOFWORK_FRAMEWORK");
            self.tracking.evaluation_framework = framework;
        }

        if let Some(v) = env_bool("PROOFWORK_SIGNING") {
            self.tracking.signing = v;
        }

        if let Ok(level) = std::env::var("PROOFWORK_LOG_LEVEL") {
            tracing::debug!(level = %level, "Env override: PROOFWORK_LOG_LEVEL");
            self.logging.level = level;
        }

        if let Some(v) = env_bool("PROOFWORK_JSON_LOGS") {
            self.logging.json_format = v;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.data_dir {
            self.data_dir = Some(dir.clone());
        }

        if cli.verbose {
            self.logging.level = "debug".to_string();
        }

        match &cli.command {
            Commands::Serve {
                host,
                port,
                no_signing,
            } => {
                if let Some(host) = host {
                    self.server.host = host.clone();
                }
                if let Some(port) = port {
                    self.server.port = *port;
                }
                if *no_signing {
                    self.tracking.signing = false;
                }
            }
            Commands::Score {
                framework: Some(framework),
                ..
            } => {
                self.tracking.evaluation_framework = framework.clone();
            }
            _ => {}
        }
    }

    /// Data directory, falling back to the platform default
    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::storage::default_data_dir(),
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(ProofworkError::Config("server.host cannot be empty".to_string()).into());
        }

        if self.server.port == 0 {
            return Err(
                ProofworkError::Config("server.port must be greater than 0".to_string()).into(),
            );
        }

        let framework = self.tracking.evaluation_framework.to_lowercase();
        if !FRAMEWORK_IDS.contains(&framework.as_str()) {
            return Err(ProofworkError::Config(format!(
                "Invalid evaluation framework: {}. Must be one of: {}",
                self.tracking.evaluation_framework,
                FRAMEWORK_IDS.join(", ")
            ))
            .into());
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ProofworkError::Config(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ))
            .into());
        }

        Ok(())
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<bool>() {
        Ok(v) => {
            tracing::debug!(value = v, "Env override: {}", key);
            Some(v)
        }
        Err(_) => {
            tracing::warn!("Invalid value for {}: {}", key, raw);
            None
        }
    }
}
