//! Global Configuration (~/.iwfm/config.toml)
//!
//! Handles user-level configuration stored in `~/.iwfm/config.toml`.

use crate::project::LoggingConfig;
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.iwfm/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Default engine library
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<GlobalEngineConfig>,

    /// Default logging settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Machine-wide engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalEngineConfig {
    /// Library used when a project names none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,

    /// Directories searched for the library
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<PathBuf>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(logging) = &self.logging {
            logging.validate("logging")?;
        }
        Ok(())
    }

    /// Get the global config file path (~/.iwfm/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".iwfm").join("config.toml"))
    }

    pub fn library(&self) -> Option<&str> {
        self.engine.as_ref().and_then(|e| e.library.as_deref())
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        self.engine
            .as_ref()
            .map(|e| e.search_paths.as_slice())
            .unwrap_or(&[])
    }

    /// Merge another global config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &GlobalConfig) {
        if other.engine.is_some() {
            self.engine = other.engine.clone();
        }
        if other.logging.is_some() {
            self.logging = other.logging.clone();
        }
    }
}
