//! Exit trap: a basic host-data sweep on every exit, normal or interrupted.
//!
//! The sweep runs at most once per process. Normal exit goes through `Drop`;
//! SIGINT/SIGTERM go through the signal handler, which sweeps and exits 130.
//! A lock file left behind by an interrupted run is reclaimed as stale by the
//! next invocation.

use crate::cleanup::host::{HostArtifacts, HostScope};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exit status after an interrupted run.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug)]
struct TrapInner {
    artifacts: HostArtifacts,
    max_age: Duration,
    fired: AtomicBool,
}

impl TrapInner {
    fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let sweep = self.artifacts.sweep(HostScope::OlderThan(self.max_age));
        debug!(
            removed = sweep.removed.len(),
            errors = sweep.errors.len(),
            "Exit sweep finished"
        );
        true
    }
}

/// Runs the data-basic sweep when dropped.
#[derive(Debug)]
#[must_use = "the sweep runs when the trap is dropped"]
pub struct ExitTrap {
    inner: Arc<TrapInner>,
}

impl ExitTrap {
    pub fn new(artifacts: HostArtifacts, max_age: Duration) -> Self {
        Self {
            inner: Arc::new(TrapInner {
                artifacts,
                max_age,
                fired: AtomicBool::new(false),
            }),
        }
    }

    /// Sweep now. Returns false if the trap already fired.
    pub fn fire(&self) -> bool {
        self.inner.fire()
    }

    /// Also sweep on SIGINT/SIGTERM. Only one handler can be installed per
    /// process; failing to install one is logged and otherwise ignored.
    pub fn install_signal_handler(&self) {
        let inner = Arc::clone(&self.inner);
        if let Err(err) = ctrlc::set_handler(move || {
            info!("Interrupted, sweeping host artifacts before exit");
            inner.fire();
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }) {
            warn!(error = %err, "Failed to install interrupt handler; exit sweep runs on normal exit only");
        }
    }
}

impl Drop for ExitTrap {
    fn drop(&mut self) {
        self.fire();
    }
}
