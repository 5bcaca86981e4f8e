//! IWFM binding configuration
//!
//! Provides configuration for programs driving the IWFM engine:
//! - Project configuration (iwfm.toml)
//! - Global user configuration (~/.iwfm/config.toml)
//! - Configuration precedence and merging
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.iwfm/config.toml)
//! 2. Project config (iwfm.toml, found by walking up from the start directory)
//! 3. Environment variables (`IWFM_LIBRARY`, `IWFM_INDEX_BASE`, `IWFM_LOG_LEVEL`)
//! 4. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use iwfm_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("{:?}", config.library());
//! ```

pub mod global;
pub mod loader;
pub mod project;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

pub use global::GlobalConfig;
pub use loader::{Config, ConfigLoader};
pub use project::{EngineConfig, LoggingConfig, ModelConfig, ProjectConfig, UnitsConfig};

/// Check a log level name
pub(crate) fn validate_level(field: &str, level: &str) -> ConfigResult<()> {
    if !matches!(
        level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("unknown log level '{}'", level),
        });
    }
    Ok(())
}

/// Check a log format name
pub(crate) fn validate_format(field: &str, format: &str) -> ConfigResult<()> {
    if !matches!(format, "compact" | "pretty" | "json") {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be 'compact', 'pretty', or 'json', got '{}'", format),
        });
    }
    Ok(())
}
