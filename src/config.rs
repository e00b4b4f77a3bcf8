//! Stack configuration loaded from YAML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data_link::GridConnectConfig;
use crate::error::{LcbError, Result};
use crate::network::CanIfConfig;
use crate::types::Config;

/// Errors raised while reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Configuration of a complete gridconnect-to-interface stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub interface: CanIfConfig,
    pub gridconnect: GridConnectConfig,
    /// Send slots of the binary CAN pipe.
    pub can_pipe_buffers: usize,
    /// Send slots of the gridconnect text pipe.
    pub gc_pipe_buffers: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            interface: CanIfConfig::default(),
            gridconnect: GridConnectConfig::default(),
            can_pipe_buffers: 4,
            gc_pipe_buffers: 4,
        }
    }
}

impl StackConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: StackConfig = serde_yaml::from_str(yaml).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config: StackConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::ParseFile {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }
}

impl Config for StackConfig {
    fn validate(&self) -> Result<()> {
        self.interface.validate()?;
        self.gridconnect.validate()?;
        if self.can_pipe_buffers == 0 || self.gc_pipe_buffers == 0 {
            return Err(LcbError::InvalidParameter(
                "pipe buffer counts must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
