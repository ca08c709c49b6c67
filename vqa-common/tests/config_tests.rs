//! Tests for bootstrap configuration resolution and loading
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate the config environment variable are marked with
//! #[serial] so they run sequentially.

use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;
use vqa_common::config::{
    load_toml_config, resolve_config_path, write_toml_config, ConfigSource, LoggingConfig,
    TomlConfig,
};

const TEST_ENV_VAR: &str = "VQA_CONFIG_TEST";

#[test]
fn test_defaults() {
    let config = TomlConfig::default();
    assert_eq!(config.bind_address, "127.0.0.1");
    assert_eq!(config.port, 5790);
    assert_eq!(config.logging.level, "info");
    assert!(config.database_path.is_none());
    assert!(config.database_path().ends_with("vqa.db"));
}

#[test]
#[serial]
fn test_cli_argument_wins_over_environment() {
    env::set_var(TEST_ENV_VAR, "/from/env.toml");
    let cli = PathBuf::from("/from/cli.toml");

    let source = resolve_config_path(Some(&cli), TEST_ENV_VAR);
    assert_eq!(source, ConfigSource::Explicit(cli));

    env::remove_var(TEST_ENV_VAR);
}

#[test]
#[serial]
fn test_environment_used_without_cli_argument() {
    env::set_var(TEST_ENV_VAR, "/from/env.toml");

    let source = resolve_config_path(None, TEST_ENV_VAR);
    assert_eq!(source, ConfigSource::Explicit(PathBuf::from("/from/env.toml")));

    env::remove_var(TEST_ENV_VAR);
}

#[test]
#[serial]
fn test_falls_back_to_user_file_or_defaults() {
    env::remove_var(TEST_ENV_VAR);

    match resolve_config_path(None, TEST_ENV_VAR) {
        ConfigSource::UserFile(path) => assert!(path.ends_with("vqa/config.toml")),
        ConfigSource::Defaults => {}
        ConfigSource::Explicit(path) => panic!("unexpected explicit source {:?}", path),
    }
}

#[test]
fn test_partial_file_fills_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "port = 6001\n").unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.port, 6001);
    assert_eq!(config.bind_address, "127.0.0.1");
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_write_then_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    let config = TomlConfig {
        database_path: Some(temp_dir.path().join("vqa.db")),
        bind_address: "0.0.0.0".to_string(),
        port: 7000,
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    };
    write_toml_config(&config, &path).unwrap();

    assert_eq!(load_toml_config(&path).unwrap(), config);
}

#[test]
fn test_explicit_missing_file_is_error() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("absent.toml");

    let err = TomlConfig::load(Some(&missing), TEST_ENV_VAR).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_malformed_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "port = \"not a number\"\n").unwrap();

    let err = load_toml_config(&path).unwrap_err();
    assert!(matches!(err, vqa_common::Error::Config(_)));
}
