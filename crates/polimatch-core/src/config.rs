//! Configuration management for polimatch
//!
//! Handles loading and validation of `pm.toml` configuration files. Every
//! section carries `#[serde(default)]`, so a partial file only overrides the
//! keys it names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "PM_CONFIG";

/// Config file name looked up under the platform config directory.
pub const CONFIG_FILE_NAME: &str = "pm.toml";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// Tunables for the estimation/selection engine and the session state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Questions (answers + skips) after which a session stops asking.
    pub max_questions: usize,
    /// A session converges once every dimension's uncertainty is below this.
    pub uncertainty_threshold: f64,
    /// Ridge term λ added to the normal equations.
    pub regularization: f64,
    /// Lower bound on per-dimension evidence when converting to uncertainty.
    pub uncertainty_floor: f64,
    /// Matches returned with every answer/skip.
    pub top_k: usize,
    /// Matches shown in compact previews.
    pub preview_k: usize,
    /// Answers required before an explicit early finish is accepted.
    pub min_answers_before_finish: usize,
    /// Importance assigned when the respondent does not rate a space.
    pub default_importance: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_questions: 20,
            uncertainty_threshold: 0.2,
            regularization: 0.01,
            uncertainty_floor: 0.1,
            top_k: 20,
            preview_k: 3,
            min_answers_before_finish: 0,
            default_importance: 3,
        }
    }
}

impl EngineConfig {
    /// Reject values that would make the engine misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_questions == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_questions must be at least 1".to_string(),
            ));
        }
        if !(self.uncertainty_threshold > 0.0 && self.uncertainty_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "engine.uncertainty_threshold must be within (0, 1], got {}",
                self.uncertainty_threshold
            )));
        }
        if !(self.regularization.is_finite() && self.regularization > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "engine.regularization must be positive, got {}",
                self.regularization
            )));
        }
        if !(self.uncertainty_floor.is_finite() && self.uncertainty_floor > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "engine.uncertainty_floor must be positive, got {}",
                self.uncertainty_floor
            )));
        }
        if self.top_k == 0 || self.preview_k == 0 {
            return Err(ConfigError::Invalid(
                "engine.top_k and engine.preview_k must be at least 1".to_string(),
            ));
        }
        if !(1..=5).contains(&self.default_importance) {
            return Err(ConfigError::Invalid(format!(
                "engine.default_importance must be within 1..=5, got {}",
                self.default_importance
            )));
        }
        Ok(())
    }
}

/// Storage settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database for completed runs. `None` keeps results in memory.
    pub db_path: Option<PathBuf>,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub logging: LogConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration, resolving the path via [`resolve_config_path`].
    ///
    /// An explicitly named file must exist; when nothing is named and no file
    /// is found in the default location the built-in defaults are returned.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        match resolve_config_path(None) {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Unreadable {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Encode(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        if self.logging.level.parse::<crate::logging::LogLevel>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "logging.level is not a valid level: {}",
                self.logging.level
            )));
        }
        Ok(())
    }
}

/// Resolve the config file location.
///
/// Precedence: explicit path, then `$PM_CONFIG`, then
/// `<config dir>/polimatch/pm.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(value) = std::env::var_os(CONFIG_ENV_VAR) {
        if !value.is_empty() {
            return Some(PathBuf::from(value));
        }
    }
    dirs::config_dir().map(|dir| dir.join("polimatch").join(CONFIG_FILE_NAME))
}
