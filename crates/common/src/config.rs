//! Engine configuration
//!
//! Configuration is read from a YAML file or from `MSCRIPT_*` environment
//! variables. Every field has a default so an empty document is valid.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable naming a YAML configuration file
pub const CONFIG_FILE_VAR: &str = "MSCRIPT_CONFIG_FILE";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Runtime configuration for the scripting engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default log filter, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Capacity of the lifecycle event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Propagation interval used when a Propagate command has no stop condition
    /// and no propagator object supplies a step size
    #[serde(default = "default_step_seconds")]
    pub default_step_seconds: f64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_buffer() -> usize {
    100
}

fn default_step_seconds() -> f64 {
    60.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: None,
            event_buffer: default_event_buffer(),
            default_step_seconds: default_step_seconds(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(CONFIG_FILE_VAR) {
            if Path::new(&path).exists() {
                return Self::from_file(&path);
            }
        }

        let mut config = Self::default();

        if let Some(level) = lookup("MSCRIPT_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(dir) = lookup("MSCRIPT_LOG_DIR") {
            config.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(buffer) = lookup("MSCRIPT_EVENT_BUFFER") {
            config.event_buffer = buffer.parse().map_err(|e| {
                Error::configuration(format!("MSCRIPT_EVENT_BUFFER: {}", e))
            })?;
        }
        if let Some(step) = lookup("MSCRIPT_DEFAULT_STEP_SECONDS") {
            config.default_step_seconds = step.parse().map_err(|e| {
                Error::configuration(format!("MSCRIPT_DEFAULT_STEP_SECONDS: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::configuration(format!(
                "Unknown log level: {}",
                self.log_level
            )));
        }
        if self.event_buffer == 0 {
            return Err(Error::configuration("event_buffer must be greater than zero"));
        }
        if !(self.default_step_seconds.is_finite() && self.default_step_seconds > 0.0) {
            return Err(Error::configuration(
                "default_step_seconds must be a positive number",
            ));
        }
        Ok(())
    }
}
