//! Runtime configuration
//!
//! Loaded from TOML, YAML or JSON; every field has a default so an empty
//! file is a valid configuration.
//!
//! ```toml
//! [logging]
//! level = "debug"
//! json = true
//!
//! [executor]
//! name = "detector"
//! eager_resolve = false
//!
//! [batching]
//! max_batch_size = 16
//! max_wait_ms = 5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub logging: LoggingConfig,
    pub executor: ExecutorConfig,
    pub batching: BatchingConfig,
}

/// Logging subscriber settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Pipeline executor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Pipeline name attached to every request context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Create all runners when the executor is built rather than on first use
    pub eager_resolve: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: None,
            eager_resolve: true,
        }
    }
}

/// Request batching settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Maximum number of submissions coalesced into one model call
    pub max_batch_size: usize,
    /// How long the first caller of a batch waits for others to join
    pub max_wait_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            max_wait_ms: 10,
        }
    }
}

impl BatchingConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "batching.max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serialized configuration formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(Error::InvalidConfig(format!(
                "cannot infer config format of '{}' (expected .toml, .yaml, .yml or .json)",
                path.display()
            ))),
        }
    }

    /// Deserialize `text` in this format
    pub fn parse<T: serde::de::DeserializeOwned>(&self, text: &str) -> Result<T> {
        Ok(match self {
            ConfigFormat::Toml => toml::from_str(text)?,
            ConfigFormat::Yaml => serde_yaml::from_str(text)?,
            ConfigFormat::Json => serde_json::from_str(text)?,
        })
    }
}

impl RuntimeConfig {
    /// Load from a file, choosing the format by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let text = std::fs::read_to_string(path)?;
        let config: Self = format.parse(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), ?format, "Loaded runtime configuration");
        Ok(config)
    }

    /// Parse from a string in the given format
    pub fn from_str_as(text: &str, format: ConfigFormat) -> Result<Self> {
        let config: Self = format.parse(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.batching.validate()
    }
}
