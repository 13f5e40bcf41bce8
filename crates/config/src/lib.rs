//! Configuration loading, validation, and management for AgentFlow.
//!
//! Loads configuration from `~/.agentflow/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use agentflow_rules::{Combine, FlowRule, RuleError, RuleSet, RuleSpec};

pub mod logging;

pub use logging::init_tracing;

/// The root configuration structure.
///
/// Maps directly to `~/.agentflow/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Turn loop settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Progress output settings
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Flow rules applied to every new session
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum messages appended per turn before the loop gives up
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// How results of several tool rules are merged
    #[serde(default)]
    pub combine: Combine,

    /// Model used by agents that do not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Temperature sent with every completion request
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_turns() -> usize {
    5
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            combine: Combine::default(),
            default_model: default_model(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Print progress lines (user prompts, tool requests, tool outputs) to stderr
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.agentflow/config.toml).
    ///
    /// Environment variables override the file:
    /// - `AGENTFLOW_MODEL`
    /// - `AGENTFLOW_MAX_TURNS`
    /// - `AGENTFLOW_COMBINE`
    /// - `AGENTFLOW_LOG`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("AGENTFLOW_MODEL") {
            self.orchestrator.default_model = model;
        }

        if let Some(raw) = lookup("AGENTFLOW_MAX_TURNS") {
            self.orchestrator.max_turns = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("AGENTFLOW_MAX_TURNS must be a positive integer, got '{raw}'"))
            })?;
        }

        if let Some(raw) = lookup("AGENTFLOW_COMBINE") {
            self.orchestrator.combine = raw
                .parse()
                .map_err(|e: RuleError| ConfigError::ValidationError(e.to_string()))?;
        }

        if let Some(level) = lookup("AGENTFLOW_LOG") {
            self.logging.level = level;
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentflow")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_turns must be at least 1".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.orchestrator.temperature) {
            return Err(ConfigError::ValidationError(
                "orchestrator.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.orchestrator.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "orchestrator.default_model cannot be empty".into(),
            ));
        }

        logging::parse_filter(&self.logging.level)?;

        self.rule_set()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(())
    }

    /// The configured rules as a [`RuleSet`].
    pub fn rule_set(&self) -> RuleSet {
        RuleSet {
            rules: self.rules.clone(),
        }
    }

    /// Build the configured rules, in declaration order.
    pub fn build_rules(&self) -> Result<Vec<FlowRule>, RuleError> {
        self.rule_set().build()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to install logging subscriber: {0}")]
    LoggingError(String),
}
