//! Automation-session capability boundary.
//!
//! The browser driver that logs into the finance portal and fills forms is
//! an external collaborator. The engine assumes nothing about it beyond this
//! contract: it can prove it is operational, and it can be stopped on demand.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::pipeline::BoxFuture;

/// One automation session, owned by exactly one bridge.
pub trait Session: Send + Sync {
    /// Prove the session can authenticate and operate. Self-test gate.
    fn probe(&self) -> BoxFuture<Result<()>>;

    /// Force the session to stop whatever it is doing, immediately.
    ///
    /// Timeout cancellation calls this; the in-flight transaction future has
    /// already been dropped, so this must not rely on it settling.
    fn terminate(&self) -> BoxFuture<Result<()>>;
}

/// Session stub that performs no portal I/O. Backs the CLI's dry-run fleet
/// and the test suite.
#[derive(Default)]
pub struct DryRunSession {
    probe_fails: bool,
    terminated: AtomicBool,
}

impl DryRunSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session whose probe always fails, for exercising the readiness path.
    pub fn failing() -> Self {
        Self {
            probe_fails: true,
            terminated: AtomicBool::new(false),
        }
    }

    /// Whether [`Session::terminate`] has been called.
    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Session for DryRunSession {
    fn probe(&self) -> BoxFuture<Result<()>> {
        let fail = self.probe_fails;
        Box::pin(async move {
            if fail {
                Err(Error::Session("dry-run probe configured to fail".into()))
            } else {
                Ok(())
            }
        })
    }

    fn terminate(&self) -> BoxFuture<Result<()>> {
        self.terminated.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}
