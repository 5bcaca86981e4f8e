//! Configuration loading and precedence tests

use iwfm_config::{ConfigError, ConfigLoader, ProjectConfig};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn create_config_file(dir: &Path, content: &str) -> PathBuf {
    let config_path = dir.join("iwfm.toml");
    fs::write(&config_path, content).unwrap();
    config_path
}

fn loader_with_global(dir: &Path, content: Option<&str>) -> ConfigLoader {
    let path = dir.join("global.toml");
    if let Some(content) = content {
        fs::write(&path, content).unwrap();
    }
    ConfigLoader::with_global_path(path)
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
#[serial]
fn test_load_full_project_config() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[engine]
library = "IWFM_C_x64.dll"
index_base = 1
log_file = "IW_API_errorLog.txt"

[model]
preprocessor = "Preprocessor/C2VSimFG_Preprocessor.in"
simulation = "Simulation/C2VSimFG.in"
for_inquiry = true

[units]
length = "feet"
area = "acres"
volume = "thousand-acre-feet"

[logging]
level = "debug"
format = "json"
"#,
    );

    let config = loader_with_global(temp_dir.path(), None)
        .load_from_directory(temp_dir.path())
        .unwrap();

    assert!(config.is_project());
    assert_eq!(config.library().as_deref(), Some("IWFM_C_x64.dll"));
    assert_eq!(config.index_base(), 1);
    assert_eq!(
        config.log_file(),
        Some(temp_dir.path().join("IW_API_errorLog.txt"))
    );

    let model = config.model().unwrap();
    assert_eq!(model.simulation, temp_dir.path().join("Simulation/C2VSimFG.in"));
    assert!(model.for_inquiry);
    assert!(model.routed_streams);

    assert_eq!(config.units().volume.as_deref(), Some("thousand-acre-feet"));
    assert_eq!(config.logging().format.as_deref(), Some("json"));
}

#[test]
#[serial]
fn test_load_when_no_config_exists() {
    let temp_dir = TempDir::new().unwrap();

    let config = loader_with_global(temp_dir.path(), None)
        .load_from_directory(temp_dir.path())
        .unwrap();

    assert!(!config.is_project());
    assert_eq!(config.library(), None);
    assert!(config.model().is_none());
}

#[test]
#[serial]
fn test_load_with_empty_config() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "");

    let config = loader_with_global(temp_dir.path(), None)
        .load_from_directory(temp_dir.path())
        .unwrap();

    assert!(config.is_project());
    assert_eq!(config.index_base(), 1);
}

#[test]
fn test_invalid_toml_reports_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(temp_dir.path(), "[engine\nlibrary = ");

    let result = ProjectConfig::load_from_file(&path);
    assert!(matches!(result, Err(ConfigError::TomlParseError { file, .. }) if file == path));
}

#[test]
fn test_missing_file() {
    let result = ProjectConfig::load_from_file(Path::new("/nonexistent/iwfm.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

// ============================================================================
// Precedence Tests
// ============================================================================

#[test]
#[serial]
fn test_global_library_used_when_project_names_none() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "");

    let config = loader_with_global(
        temp_dir.path(),
        Some(
            r#"
[engine]
library = "libIWFM_C.so"
search_paths = ["/opt/iwfm/lib"]
"#,
        ),
    )
    .load_from_directory(temp_dir.path())
    .unwrap();

    assert_eq!(config.library().as_deref(), Some("libIWFM_C.so"));
    assert_eq!(config.search_paths(), vec![PathBuf::from("/opt/iwfm/lib")]);
}

#[test]
#[serial]
fn test_project_overrides_global() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[engine]
library = "IWFM_C_x64.dll"
search_paths = ["bin"]

[logging]
level = "trace"
"#,
    );

    let config = loader_with_global(
        temp_dir.path(),
        Some(
            r#"
[engine]
library = "libIWFM_C.so"
search_paths = ["/opt/iwfm/lib"]

[logging]
level = "warn"
format = "pretty"
"#,
        ),
    )
    .load_from_directory(temp_dir.path())
    .unwrap();

    assert_eq!(config.library().as_deref(), Some("IWFM_C_x64.dll"));
    assert_eq!(
        config.search_paths(),
        vec![temp_dir.path().join("bin"), PathBuf::from("/opt/iwfm/lib")]
    );
    let logging = config.logging();
    assert_eq!(logging.level.as_deref(), Some("trace"));
    assert_eq!(logging.format.as_deref(), Some("pretty"));
}

#[test]
#[serial]
fn test_env_overrides_project() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[engine]
library = "IWFM_C_x64.dll"

[logging]
level = "info"
"#,
    );

    env::set_var("IWFM_LIBRARY", "/srv/iwfm/libIWFM_C.so");
    env::set_var("IWFM_LOG_LEVEL", "debug");
    let result = loader_with_global(temp_dir.path(), None).load_from_directory(temp_dir.path());
    env::remove_var("IWFM_LIBRARY");
    env::remove_var("IWFM_LOG_LEVEL");

    let config = result.unwrap();
    assert_eq!(config.library().as_deref(), Some("/srv/iwfm/libIWFM_C.so"));
    assert_eq!(config.logging().level.as_deref(), Some("debug"));
}

#[rstest]
#[case("IWFM_INDEX_BASE", "one")]
#[case("IWFM_INDEX_BASE", "2")]
#[case("IWFM_LOG_LEVEL", "verbose")]
#[serial]
fn test_invalid_env_values(#[case] var: &str, #[case] value: &str) {
    let temp_dir = TempDir::new().unwrap();

    env::set_var(var, value);
    let result = loader_with_global(temp_dir.path(), None).load_from_directory(temp_dir.path());
    env::remove_var(var);

    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
}

#[test]
#[serial]
fn test_invalid_global_config_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = loader_with_global(
        temp_dir.path(),
        Some(
            r#"
[logging]
format = "xml"
"#,
        ),
    )
    .load_from_directory(temp_dir.path());

    assert!(result.is_err());
}
