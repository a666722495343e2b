//! Integration tests for loading pool configuration files

use procpool::{FailurePolicy, PoolConfig, PoolError};
use std::time::Duration;
use tempfile::TempDir;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("procpool.toml");
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_load_full_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
processes = 4
max_tasks_per_worker = 100
handoff_timeout = "10s"
shutdown_grace = "500ms"
failure_policy = { mode = "redispatch", max_attempts = 3 }
"#,
    );

    let config = PoolConfig::load(&path).await.unwrap();
    assert_eq!(config.processes, 4);
    assert_eq!(config.max_tasks_per_worker, Some(100));
    assert_eq!(config.handoff_timeout, Duration::from_secs(10));
    assert_eq!(config.shutdown_grace, Duration::from_millis(500));
    assert_eq!(
        config.failure_policy,
        FailurePolicy::Redispatch { max_attempts: 3 }
    );
}

#[tokio::test]
async fn test_load_partial_config_keeps_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "processes = 1\n");

    let config = PoolConfig::load(&path).await.unwrap();
    assert_eq!(config.processes, 1);
    assert_eq!(config.handoff_timeout, Duration::from_secs(5));
    assert_eq!(config.failure_policy, FailurePolicy::FailBatch);
}

#[tokio::test]
async fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "processes = 0\n");

    let err = PoolConfig::load(&path).await.unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfiguration { .. }));
}

#[tokio::test]
async fn test_load_rejects_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "processes = [\n");

    let err = PoolConfig::load(&path).await.unwrap_err();
    assert!(matches!(err, PoolError::Config(_)));
}

#[tokio::test]
async fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = PoolConfig::load(&dir.path().join("absent.toml"))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Io(_)));
}

#[test]
fn test_config_serializes_back_to_toml() {
    let config = PoolConfig::default()
        .with_processes(3)
        .with_failure_policy(FailurePolicy::Redispatch { max_attempts: 2 });
    let text = toml::to_string(&config).unwrap();
    assert!(text.contains("processes = 3"));
    assert!(text.contains("handoff_timeout = \"5s\""));

    let parsed = PoolConfig::from_toml(&text).unwrap();
    assert_eq!(parsed, config);
}
