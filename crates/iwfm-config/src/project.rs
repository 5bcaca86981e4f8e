//! Project Configuration (iwfm.toml)
//!
//! Handles the configuration stored in `iwfm.toml` next to a model scenario.

use crate::{validate_format, validate_level, ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project configuration from iwfm.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Engine library settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,

    /// Model scenario input files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,

    /// Units for returned results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<UnitsConfig>,

    /// Logging settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Engine library settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Library name or path (e.g. "IWFM_C_x64.dll")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,

    /// Base of location numbers inside the engine (0 or 1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_base: Option<u8>,

    /// File the engine writes its own error log to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Extra directories to search for the library
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<PathBuf>,
}

/// Model scenario input files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Preprocessor main input file
    pub preprocessor: PathBuf,

    /// Simulation main input file
    pub simulation: PathBuf,

    /// Stream flows are routed inside the engine (default: true)
    #[serde(default = "default_true")]
    pub routed_streams: bool,

    /// Open the model for data retrieval only (default: false)
    #[serde(default)]
    pub for_inquiry: bool,
}

fn default_true() -> bool {
    true
}

/// Units for returned results
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct UnitsConfig {
    /// "feet" or "meters"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,

    /// "square-feet", "acres", "square-meters" or "hectares"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,

    /// "cubic-feet", "acre-feet", "thousand-acre-feet" or "cubic-meters"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum level ("trace" .. "error")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// "compact", "pretty" or "json"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Extra filter directives
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl LoggingConfig {
    /// Fill unset fields from `fallback`
    pub fn or(&self, fallback: &LoggingConfig) -> LoggingConfig {
        LoggingConfig {
            level: self.level.clone().or_else(|| fallback.level.clone()),
            format: self.format.clone().or_else(|| fallback.format.clone()),
            filter: self.filter.clone().or_else(|| fallback.filter.clone()),
        }
    }

    pub(crate) fn validate(&self, section: &str) -> ConfigResult<()> {
        if let Some(level) = &self.level {
            validate_level(&format!("{}.level", section), level)?;
        }
        if let Some(format) = &self.format {
            validate_format(&format!("{}.format", section), format)?;
        }
        Ok(())
    }
}

impl ProjectConfig {
    /// Load project configuration from a file
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

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(engine) = &self.engine {
            if let Some(base) = engine.index_base {
                validate_index_base("engine.index_base", base)?;
            }
            if matches!(&engine.library, Some(l) if l.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "engine.library".to_string(),
                    reason: "library cannot be empty".to_string(),
                });
            }
        }

        if let Some(model) = &self.model {
            for (field, path) in [
                ("model.preprocessor", &model.preprocessor),
                ("model.simulation", &model.simulation),
            ] {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        reason: "path cannot be empty".to_string(),
                    });
                }
            }
        }

        if let Some(logging) = &self.logging {
            logging.validate("logging")?;
        }

        // Unit names are checked by the runtime, which owns the unit tables
        Ok(())
    }

    pub fn library(&self) -> Option<&str> {
        self.engine.as_ref().and_then(|e| e.library.as_deref())
    }

    pub fn index_base(&self) -> Option<u8> {
        self.engine.as_ref().and_then(|e| e.index_base)
    }
}

/// Index base must be 0 or 1
pub(crate) fn validate_index_base(field: &str, base: u8) -> ConfigResult<()> {
    if base > 1 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be 0 or 1, got {}", base),
        });
    }
    Ok(())
}
