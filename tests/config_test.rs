//! Integration tests for environment-driven configuration.

use std::sync::Mutex;
use std::time::Duration;

use bridgeq::config::Config;
use bridgeq::error::Error;

// Env vars are process-global; serialize the tests that touch them.
static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn defaults_apply_when_env_is_unset() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        std::env::remove_var("BRIDGEQ_SNAPSHOT_DIR");
        std::env::remove_var("BRIDGEQ_TICK_MS");
        std::env::remove_var("BRIDGEQ_READY_TIMEOUT_S");
        std::env::remove_var("BRIDGEQ_OUTCOME_CAP");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.snapshot_dir, None);
    assert_eq!(config.tick, Duration::from_millis(500));
    assert_eq!(config.ready_timeout, Duration::from_secs(30));
    assert_eq!(config.outcome_cap, 200);
    assert!(!config.log_level.is_empty());
}

#[test]
fn overrides_parse_into_typed_knobs() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        std::env::set_var("BRIDGEQ_TICK_MS", "250");
        std::env::set_var("BRIDGEQ_EXEC_TIMEOUT_S", "60");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.tick, Duration::from_millis(250));
    assert_eq!(config.exec_timeout, Duration::from_secs(60));

    unsafe {
        std::env::remove_var("BRIDGEQ_TICK_MS");
        std::env::remove_var("BRIDGEQ_EXEC_TIMEOUT_S");
    }
}

#[test]
fn malformed_value_is_a_startup_error() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        std::env::set_var("BRIDGEQ_OUTCOME_CAP", "many");
    }

    let err = Config::from_env().unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("BRIDGEQ_OUTCOME_CAP"));

    unsafe {
        std::env::remove_var("BRIDGEQ_OUTCOME_CAP");
    }
}
