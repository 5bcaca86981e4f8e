//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{validate_index_base, EngineConfig, LoggingConfig, ModelConfig, ProjectConfig, UnitsConfig};
use crate::{validate_level, ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Name of the project configuration file
pub const PROJECT_CONFIG_FILE: &str = "iwfm.toml";

/// Index base used when nothing is configured
pub const DEFAULT_INDEX_BASE: u8 = 1;

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.iwfm/config.toml) - lowest priority
/// 2. Project config (iwfm.toml) - overrides global
/// 3. Environment variables (IWFM_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where iwfm.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use `path` instead of ~/.iwfm/config.toml
    pub fn with_global_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find iwfm.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config()?;
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config()?;
        let project_config = self.apply_env_overrides(project_config)?;

        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    ///
    /// Returns (project_root, project_config), or defaults when no file exists
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_CONFIG_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration; a missing file or home directory yields defaults
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        if self.global_config_path.is_none() {
            match GlobalConfig::global_config_path() {
                Ok(path) => self.global_config_path = Some(path),
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            }
        }

        match &self.global_config_path {
            Some(path) if path.exists() => GlobalConfig::load_from_file(path),
            _ => Ok(GlobalConfig::default()),
        }
    }

    /// Apply environment variable overrides to project config
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if let Ok(library) = env::var("IWFM_LIBRARY") {
            if !library.trim().is_empty() {
                config.engine.get_or_insert_with(EngineConfig::default).library = Some(library);
            }
        }

        if let Ok(base) = env::var("IWFM_INDEX_BASE") {
            let parsed: u8 = base.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "IWFM_INDEX_BASE".to_string(),
                reason: format!("must be 0 or 1, got '{}'", base),
            })?;
            validate_index_base("IWFM_INDEX_BASE", parsed)?;
            config.engine.get_or_insert_with(EngineConfig::default).index_base = Some(parsed);
        }

        if let Ok(level) = env::var("IWFM_LOG_LEVEL") {
            validate_level("IWFM_LOG_LEVEL", &level)?;
            config.logging.get_or_insert_with(LoggingConfig::default).level = Some(level);
        }

        Ok(config)
    }

    /// Get the global configuration directory (~/.iwfm)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".iwfm"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if this is a project (has iwfm.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }

    /// Resolve a configured path against the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.project_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Effective library (project > global)
    ///
    /// A value containing a directory is resolved against the project root;
    /// a bare name is left for the library search.
    pub fn library(&self) -> Option<String> {
        if let Some(library) = self.project.library() {
            let path = Path::new(library);
            if path.components().count() > 1 {
                return Some(self.resolve(path).display().to_string());
            }
            return Some(library.to_string());
        }
        self.global.library().map(str::to_string)
    }

    /// Directories to search for the library, project entries first
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let project = self
            .project
            .engine
            .iter()
            .flat_map(|e| e.search_paths.iter())
            .map(|p| self.resolve(p));
        project.chain(self.global.search_paths().iter().cloned()).collect()
    }

    /// Effective index base (default 1)
    pub fn index_base(&self) -> u8 {
        self.project.index_base().unwrap_or(DEFAULT_INDEX_BASE)
    }

    /// Engine-side error log file, resolved
    pub fn log_file(&self) -> Option<PathBuf> {
        self.project
            .engine
            .as_ref()
            .and_then(|e| e.log_file.as_deref())
            .map(|p| self.resolve(p))
    }

    /// Model inputs with paths resolved against the project root
    pub fn model(&self) -> Option<ModelConfig> {
        self.project.model.as_ref().map(|m| ModelConfig {
            preprocessor: self.resolve(&m.preprocessor),
            simulation: self.resolve(&m.simulation),
            routed_streams: m.routed_streams,
            for_inquiry: m.for_inquiry,
        })
    }

    pub fn units(&self) -> UnitsConfig {
        self.project.units.clone().unwrap_or_default()
    }

    /// Logging settings (project > global)
    pub fn logging(&self) -> LoggingConfig {
        let global = self.global.logging.clone().unwrap_or_default();
        match &self.project.logging {
            Some(project) => project.or(&global),
            None => global,
        }
    }
}
