//! Typed configuration from environment variables.
//!
//! Loads once at startup. Every knob has a default; a malformed value is a
//! startup error, not a silent fallback.

pub mod fleet;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    /// Directory for the queue snapshot. Persistence is off when unset.
    pub snapshot_dir: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Dispatch poll interval.
    pub tick: Duration,
    /// Per-item execution deadline.
    pub exec_timeout: Duration,
    /// Fleet readiness deadline.
    pub ready_timeout: Duration,
    /// Outcome log cap.
    pub outcome_cap: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            snapshot_dir: std::env::var("BRIDGEQ_SNAPSHOT_DIR").ok().map(PathBuf::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tick: Duration::from_millis(parsed_var("BRIDGEQ_TICK_MS", 500)?),
            exec_timeout: Duration::from_secs(parsed_var("BRIDGEQ_EXEC_TIMEOUT_S", 300)?),
            ready_timeout: Duration::from_secs(parsed_var("BRIDGEQ_READY_TIMEOUT_S", 30)?),
            outcome_cap: parsed_var("BRIDGEQ_OUTCOME_CAP", 200)?,
        })
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {name}: {raw}"))),
        Err(_) => Ok(default),
    }
}
