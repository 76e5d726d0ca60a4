//! Startup barrier: dispatch is withheld until the whole fleet reports
//! operational, or startup fails outright.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::bridge::BridgeRegistry;
use crate::error::{Error, Result};

/// Default deadline for fleet readiness.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Waits for every bridge's self-test to pass before dispatch may start.
pub struct ReadinessGate {
    registry: Arc<BridgeRegistry>,
    timeout: Duration,
}

impl ReadinessGate {
    pub fn new(registry: Arc<BridgeRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Kick off every bridge's self-test concurrently, then poll once per
    /// second until the whole fleet is operational. Individual self-test
    /// failures are logged by the bridge and tolerated here; missing the
    /// deadline is fatal; the process must not run partially ready.
    pub async fn wait(&self) -> Result<()> {
        let total = self.registry.len();
        if total == 0 {
            info!("fleet is empty, readiness is vacuous");
            return Ok(());
        }

        for bridge in self.registry.all() {
            let bridge = Arc::clone(bridge);
            tokio::spawn(async move { bridge.self_test().await });
        }

        let started = tokio::time::Instant::now();
        loop {
            let ready = self.registry.operational_count();
            if ready == total {
                info!(bridges = total, "fleet ready, dispatch enabled");
                return Ok(());
            }
            if started.elapsed() >= self.timeout {
                warn!(ready, total, "fleet readiness not reached before deadline");
                return Err(Error::ReadinessTimeout {
                    secs: self.timeout.as_secs(),
                });
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
