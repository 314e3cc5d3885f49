//! Engine configuration
//!
//! Loaded from YAML. Every key is optional; missing keys take defaults.
//!
//! ```yaml
//! repository:
//!   adapter_timeout_ms: 5000
//!   debounce_ms: 250
//! merge:
//!   source_confidence: 0.8
//!   set_fields: [document_refs, tags, aliases]
//!   typed_fields:
//!     date: date
//! ```

use crate::merge::MergePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Repository timing knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Per-adapter deadline for one `list` call
    pub adapter_timeout_ms: u64,
    /// Window in which reconcile requests for one kind coalesce
    pub debounce_ms: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_ms: 5_000,
            debounce_ms: 250,
        }
    }
}

impl RepositoryConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub repository: RepositoryConfig,
    pub merge: MergePolicy,
}

impl EngineConfig {
    /// `<config dir>/casesync/config.yaml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("casesync").join("config.yaml"))
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Load `path` if given, else the default path if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.adapter_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "repository.adapter_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        let confidence = self.merge.source_confidence;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ConfigError::InvalidValue {
                key: "merge.source_confidence".to_string(),
                message: format!("{} is outside [0, 1]", confidence),
            });
        }
        Ok(())
    }
}
