//! Fleet roster loaded from a TOML file.
//!
//! The roster names each bridge and its affinity. Sessions and transaction
//! scripts are attached by the caller when the fleet is built; the roster is
//! data only.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level TOML wrapper: a list of `[[bridge]]` tables.
#[derive(Debug, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub bridge: Vec<BridgeMeta>,
}

/// One bridge's roster line.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeMeta {
    pub name: String,
    #[serde(default)]
    pub year: Option<i32>,
    /// Explicit kinds. Absent means catch-all.
    #[serde(default)]
    pub kinds: Option<Vec<String>>,
}

impl FleetConfig {
    /// Load and validate the roster. Bridge names must be unique; an empty
    /// roster is legal (readiness is then vacuous).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read fleet roster {}: {e}", path.display()))
        })?;
        let config: FleetConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad fleet roster {}: {e}", path.display())))?;

        let mut seen = HashSet::new();
        for meta in &config.bridge {
            if !seen.insert(meta.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate bridge name in roster: {}",
                    meta.name
                )));
            }
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
