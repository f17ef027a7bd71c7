//! Guest readiness poller.
//!
//! Polls the guest with the configured probe command (a process presence
//! check for the desktop session) at a fixed interval. Whether a caller can
//! live with a guest that is still booting is part of the profile it passes,
//! never derived from the command being run.

use crate::orchestrator::Orchestrator;
use std::time::Duration;
use testvm_common::{OrchestratorError, VmController};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessProfile {
    pub max_attempts: u32,
    pub poll_interval: Duration,
    /// When set, an unready guest is a warning rather than an error.
    pub tolerates_not_ready: bool,
}

impl ReadinessProfile {
    /// Setup-like callers: a few attempts, proceed anyway.
    pub fn short(max_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            max_attempts,
            poll_interval,
            tolerates_not_ready: true,
        }
    }

    /// Callers about to hand the guest to test automation.
    pub fn long(max_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            max_attempts,
            poll_interval,
            tolerates_not_ready: false,
        }
    }
}

impl<C: VmController> Orchestrator<C> {
    /// Poll until the guest reports ready or attempts run out.
    pub fn wait_for_interactive_ready(&self, profile: &ReadinessProfile) -> bool {
        let command = &self.settings.probe_command;
        for attempt in 1..=profile.max_attempts {
            match self.controller.guest_exec(&self.machine, command) {
                Ok(output) if output.success => {
                    info!(machine = %self.machine, attempt, "Guest is interactively ready");
                    return true;
                }
                Ok(_) => debug!(machine = %self.machine, attempt, "Guest not ready yet"),
                Err(e) => debug!(machine = %self.machine, attempt, error = %e, "Readiness probe failed"),
            }
            if attempt < profile.max_attempts {
                std::thread::sleep(profile.poll_interval);
            }
        }
        false
    }

    /// Like [`Self::wait_for_interactive_ready`], but an unready guest is a
    /// `ReadinessTimeout` unless the profile tolerates it. Returns whether the
    /// guest was actually seen ready.
    pub fn require_ready(&self, profile: &ReadinessProfile) -> Result<bool, OrchestratorError> {
        if self.wait_for_interactive_ready(profile) {
            return Ok(true);
        }
        if profile.tolerates_not_ready {
            warn!(
                machine = %self.machine,
                attempts = profile.max_attempts,
                "Guest not ready yet, continuing; it is probably still booting"
            );
            return Ok(false);
        }
        Err(OrchestratorError::ReadinessTimeout {
            machine: self.machine.to_string(),
            attempts: profile.max_attempts,
        })
    }
}
