use ctxgraph_core::{init_tracing, ConfigError, ConfigManager, CtxGraphConfig, LoggingConfig};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    ConfigManager::create_default_config(&path).unwrap();
    assert!(path.exists());

    let manager = ConfigManager::load_from(&path).unwrap();
    assert_eq!(manager.config_path(), Some(path.as_path()));

    let defaults = CtxGraphConfig::default();
    assert_eq!(
        manager.config().cache.capacity_bytes,
        defaults.cache.capacity_bytes
    );
    assert_eq!(
        manager.config().context.include_extensions,
        defaults.context.include_extensions
    );
}

#[test]
fn test_partial_file_keeps_defaults_for_missing_fields() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ctxgraph.toml");
    fs::write(
        &path,
        r#"
[context]
max_context_size = 12

[invalidation]
retry_delay_ms = 5
"#,
    )
    .unwrap();

    let manager = ConfigManager::load_from(&path).unwrap();
    let config = manager.config();
    assert_eq!(config.context.max_context_size, 12);
    assert_eq!(config.invalidation.retry_delay_ms, 5);
    assert_eq!(config.invalidation.max_retries, 3);
    assert_eq!(config.batch.window_ms, 100);
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ctxgraph.toml");
    fs::write(&path, "[cache]\ncapacity_bytes = 0\n").unwrap();

    assert!(matches!(
        ConfigManager::load_from(&path),
        Err(ConfigError::ValidationError(_))
    ));
}

#[test]
fn test_missing_and_malformed_files() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        ConfigManager::load_from(&dir.path().join("absent.toml")),
        Err(ConfigError::NotFound(_))
    ));

    let path = dir.path().join("broken.toml");
    fs::write(&path, "[context\nmax_context_size = ").unwrap();
    assert!(matches!(
        ConfigManager::load_from(&path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_tracing_init_is_idempotent() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        format: "compact".to_string(),
    };
    init_tracing(&config);
    assert!(!init_tracing(&config));
}
