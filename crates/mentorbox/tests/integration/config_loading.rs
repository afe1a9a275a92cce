use mentorbox::{Config, ConfigError, EXAMPLE_CONFIG, ExecutionRequest, ExecutionStatus, Sandbox};

use super::fixture_config;

#[test]
fn test_load_valid_config() {
    let config = Config::from_file(fixture_config("valid_full.toml")).expect("Failed to load config");

    assert_eq!(config.allowed_modules, vec!["math", "time"]);
    assert_eq!(config.limits.timeout_seconds, Some(5.0));
    assert_eq!(config.limits.max_output_bytes, Some(4096));
    assert_eq!(config.limits.max_recursion_depth, Some(50));
    assert_eq!(config.limits.max_collection_len, Some(10_000));
    assert_eq!(config.limits.cancel_grace_ms, Some(100));
}

#[test]
fn test_load_minimal_config() {
    let config =
        Config::from_file(fixture_config("valid_minimal.toml")).expect("Failed to load config");

    assert_eq!(config.limits.timeout_seconds, Some(2.5));
    assert_eq!(config.allowed_modules, vec!["math", "random", "datetime", "json"]);
    assert_eq!(
        config.effective_limits(None).recursion_limit(),
        mentorbox::types::DEFAULT_MAX_RECURSION_DEPTH as usize
    );
}

#[test]
fn test_load_invalid_unknown_module() {
    let result = Config::from_file(fixture_config("invalid_unknown_module.toml"));
    assert!(matches!(result, Err(ConfigError::Invalid(message)) if message.contains("'os'")));
}

#[test]
fn test_load_invalid_timeout() {
    let result = Config::from_file(fixture_config("invalid_timeout.toml"));
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_load_invalid_syntax() {
    let result = Config::from_file(fixture_config("invalid_syntax.toml"));
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_load_missing_file() {
    let result = Config::from_file(fixture_config("does_not_exist.toml"));
    assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
}

#[test]
fn test_example_config_round_trips_through_file() {
    let path = std::env::temp_dir().join(format!("mentorbox-example-{}.toml", std::process::id()));
    std::fs::write(&path, EXAMPLE_CONFIG).unwrap();
    let loaded = Config::from_file(&path);
    let _ = std::fs::remove_file(&path);

    let loaded = loaded.unwrap();
    let default = Config::default();
    assert_eq!(loaded.limits, default.limits);
    assert_eq!(loaded.allowed_modules, default.allowed_modules);
}

#[tokio::test]
async fn test_loaded_config_drives_execution() {
    let config = Config::from_file(fixture_config("valid_full.toml")).unwrap();
    let sandbox = Sandbox::new(config).unwrap();

    let result = sandbox
        .execute(&ExecutionRequest::python("import time\nimport math\nprint(math.floor(time.time()) > 0)"))
        .await
        .unwrap();
    assert!(result.succeeded(), "{:?}", result.error_detail());

    let result = sandbox
        .execute(&ExecutionRequest::python("import json"))
        .await
        .unwrap();
    assert_eq!(result.status(), ExecutionStatus::CapabilityViolation);

    let result = sandbox
        .execute(&ExecutionRequest::python("print('x' * 5000)"))
        .await
        .unwrap();
    assert!(result.error_detail().unwrap().contains("MemoryError"));
}
