//! Connections built from `trellis.toml`

use std::time::Duration;

use tempfile::TempDir;
use trellis::{TrellisConfig, CONFIG_FILE_NAME};

use crate::common::*;

#[test]
fn connection_from_config_file() {
    let env = TestEnv::new();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "isolation = \"write-through\"\nlock_timeout_ms = 25\n").unwrap();

    let config = TrellisConfig::load(&path).unwrap();
    assert_eq!(config.lock_timeout(), Some(Duration::from_millis(25)));
    let holder = OptimisticConnection::with_config(env.store.connection(), env.coordinator.clone(), &config).unwrap();
    let waiter = OptimisticConnection::with_config(env.store.connection(), env.coordinator.clone(), &config).unwrap();
    assert_eq!(holder.isolation(), IsolationLevel::WriteThrough);

    holder.begin().unwrap();
    assert!(matches!(waiter.begin(), Err(TxnError::LockTimeout(d)) if d == Duration::from_millis(25)));
    holder.commit().unwrap();
}

#[test]
fn missing_config_file_gets_defaults() {
    let env = TestEnv::new();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);

    let config = TrellisConfig::load(&path).unwrap();
    assert!(path.exists());
    assert_eq!(config, TrellisConfig::default());

    let conn = OptimisticConnection::with_config(env.store.connection(), env.coordinator.clone(), &config).unwrap();
    assert_eq!(conn.isolation(), IsolationLevel::Snapshot);
    assert_eq!(config.retry.max_retries, 3);
}

#[test]
fn unknown_isolation_is_rejected() {
    let env = TestEnv::new();
    let config = TrellisConfig {
        isolation: "read-uncommitted".to_string(),
        ..TrellisConfig::default()
    };
    let result = OptimisticConnection::with_config(env.store.connection(), env.coordinator.clone(), &config);
    assert!(matches!(result, Err(TxnError::Config(_))));
}
