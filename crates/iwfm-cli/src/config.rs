//! CLI configuration
//!
//! Output preferences come from environment variables; engine settings come
//! from `iwfm.toml` and `~/.iwfm/config.toml` through `iwfm-config`.

use anyhow::{Context, Result};
use iwfm_config::{Config as ProjectSettings, ConfigLoader};
use std::env;
use std::path::Path;

/// CLI preferences loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Default to JSON output (IWFM_OUTPUT=json)
    pub default_json: bool,
    /// Hide progress bars (IWFM_NO_PROGRESS=1)
    pub no_progress: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            default_json: env::var("IWFM_OUTPUT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            no_progress: env::var("IWFM_NO_PROGRESS")
                .map(|v| {
                    let lower = v.to_lowercase();
                    !(lower.is_empty() || lower == "0" || lower == "false" || lower == "off")
                })
                .unwrap_or(false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Merged engine settings
///
/// An explicit `--config` file must exist; otherwise `iwfm.toml` is looked
/// up from the current directory and its absence is not an error.
pub fn load_settings(explicit: Option<&Path>) -> Result<ProjectSettings> {
    let mut loader = ConfigLoader::new();
    match explicit {
        Some(path) => loader
            .load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            let cwd = env::current_dir().context("Failed to read current directory")?;
            loader
                .load_from_directory(&cwd)
                .context("Failed to load iwfm.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_config_from_env() {
        env::remove_var("IWFM_OUTPUT");
        env::remove_var("IWFM_NO_PROGRESS");
        let config = Config::from_env();
        assert!(!config.default_json);
        assert!(!config.no_progress);

        env::set_var("IWFM_OUTPUT", "JSON");
        env::set_var("IWFM_NO_PROGRESS", "1");
        let config = Config::from_env();
        assert!(config.default_json);
        assert!(config.no_progress);

        env::set_var("IWFM_NO_PROGRESS", "off");
        assert!(!Config::from_env().no_progress);

        env::remove_var("IWFM_OUTPUT");
        env::remove_var("IWFM_NO_PROGRESS");
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let err = load_settings(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("not found"));
    }

    #[test]
    fn test_explicit_config_resolves_against_its_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("iwfm.toml");
        fs::write(
            &path,
            "[model]\npreprocessor = \"PP.IN\"\nsimulation = \"SIM.IN\"\n",
        )
        .unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        let model = settings.model().unwrap();
        assert_eq!(model.preprocessor, dir.path().join("PP.IN"));
    }
}
