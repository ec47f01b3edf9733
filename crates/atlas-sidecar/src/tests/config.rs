use crate::{CONFIG_VERSION, SupervisorConfig};

use tempfile::TempDir;

#[test]
fn test_defaults() {
    let config = SupervisorConfig::default();

    assert_eq!(config.version, CONFIG_VERSION);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.ready_marker, "Application startup complete");
    assert_eq!(config.resilience.max_restarts, 3);
    assert_eq!(config.resilience.initial_backoff_ms, 1000);
    assert_eq!(config.resilience.backoff_factor, 1.0);
    assert_eq!(config.resilience.startup_timeout_secs, 10);
    assert_eq!(config.resilience.shutdown_grace_secs, 5);
    assert_eq!(config.resilience.health_interval_secs, 30);
    assert_eq!(config.resilience.probe_timeout_secs, 2);
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_or_create_writes_default_file() {
    let dir = TempDir::new().unwrap();

    let config = SupervisorConfig::load_or_create(dir.path()).unwrap();
    assert_eq!(config.version, CONFIG_VERSION);
    assert!(dir.path().join("config.toml").exists());

    // A second load parses the file it just wrote.
    let reloaded = SupervisorConfig::load_or_create(dir.path()).unwrap();
    assert_eq!(reloaded.server.host, config.server.host);
    assert_eq!(
        reloaded.resilience.max_restarts,
        config.resilience.max_restarts
    );
}

#[test]
fn test_load_respects_overrides() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "version = 1\n\n[resilience]\nmax_restarts = 7\nhealth_interval_secs = 5\n",
    )
    .unwrap();

    let config = SupervisorConfig::load_or_create(dir.path()).unwrap();
    assert_eq!(config.resilience.max_restarts, 7);
    assert_eq!(config.resilience.health_interval_secs, 5);
    // Untouched sections fall back to defaults.
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn test_migration_from_version_zero() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), "version = 0\n").unwrap();

    let config = SupervisorConfig::load_or_create(dir.path()).unwrap();
    assert_eq!(config.version, CONFIG_VERSION);
    assert_eq!(config.resilience.max_restarts, 3);

    // Migration is persisted back to disk.
    let content = std::fs::read_to_string(dir.path().join("config.toml")).unwrap();
    assert!(content.contains("version = 1"));
}

#[test]
fn test_validate_rejects_non_loopback_host() {
    let mut config = SupervisorConfig::default();
    config.server.host = "0.0.0.0".into();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_accepts_localhost_alias() {
    let mut config = SupervisorConfig::default();
    config.server.host = "localhost".into();
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_rejects_empty_ready_marker() {
    let mut config = SupervisorConfig::default();
    config.server.ready_marker = String::new();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_zero_startup_timeout() {
    let mut config = SupervisorConfig::default();
    config.resilience.startup_timeout_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_shrinking_backoff() {
    let mut config = SupervisorConfig::default();
    config.resilience.backoff_factor = 0.5;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_toml_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), "not valid toml [").unwrap();
    assert!(SupervisorConfig::load_or_create(dir.path()).is_err());
}
