use brrtstream::error::ConfigError;
use brrtstream::runtime_config::{ResponseMode, RuntimeConfig, ServerMode};
use brrtstream::stream::StreamConfig;
use std::time::Duration;

mod common;
use common::temp_files;

#[test]
fn test_yaml_file_overrides_defaults() {
    let file = temp_files::yaml("abort_delay_ms: 1200\nserver_mode: test\n");
    let config = RuntimeConfig::from_yaml_file(file.path()).unwrap();
    assert_eq!(config.abort_delay, Duration::from_millis(1200));
    assert_eq!(config.server_mode, ServerMode::Test);
    assert_eq!(config.response_mode, ResponseMode::Router);
    assert_eq!(config.stack_size, RuntimeConfig::default().stack_size);

    let stream = StreamConfig::from(&config);
    assert_eq!(stream.abort_delay, Duration::from_millis(1200));
    assert_eq!(stream.server_mode, ServerMode::Test);
}

#[test]
fn test_empty_file_is_all_defaults() {
    let file = temp_files::yaml("");
    assert_eq!(
        RuntimeConfig::from_yaml_file(file.path()).unwrap(),
        RuntimeConfig::default()
    );
}

#[test]
fn test_missing_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");
    let err = RuntimeConfig::from_yaml_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.yaml"));
}

// The only test in this binary that touches the process environment.
#[test]
fn test_environment_applies_on_top_of_file() {
    let file = temp_files::yaml("abort_delay_ms: 1200\nresponse_mode: legacy\n");
    std::env::set_var("BRRTS_ABORT_DELAY_MS", "75");
    std::env::set_var("BRRTS_STACK_SIZE", "0x4000");
    std::env::set_var("BRRTS_SERVER_MODE", "bogus");

    let config = RuntimeConfig::from_yaml_file(file.path())
        .unwrap()
        .with_env_overrides();

    std::env::remove_var("BRRTS_ABORT_DELAY_MS");
    std::env::remove_var("BRRTS_STACK_SIZE");
    std::env::remove_var("BRRTS_SERVER_MODE");

    assert_eq!(config.abort_delay, Duration::from_millis(75));
    assert_eq!(config.stack_size, 0x4000);
    assert_eq!(config.response_mode, ResponseMode::Legacy);
    // Invalid values are ignored, not fatal.
    assert_eq!(config.server_mode, ServerMode::Production);
}
