//! The orchestrator: sequencing and fallback logic around a [`VmController`].
//!
//! Its behaviour is split across modules by component:
//! [`crate::probe`] (state probe, ensure-running, graceful stop),
//! [`crate::snapshots`] (snapshot registry), [`crate::readiness`] (guest
//! readiness poller), [`crate::restore`] (fallback restoration protocol) and
//! [`crate::cleanup`] (cleanup level engine).

use crate::readiness::ReadinessProfile;
use std::time::Duration;
use testvm_common::config::TestvmConfig;
use testvm_common::{MachineName, VmController};

/// Tunables the orchestrator components read. Built from configuration in
/// production, with zero waits in tests.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub graceful_stop_timeout: Duration,
    /// Interval between state probes while waiting for a graceful stop.
    pub stop_poll_interval: Duration,
    pub short_readiness: ReadinessProfile,
    pub long_readiness: ReadinessProfile,
    pub probe_command: String,
    pub sync_step: String,
    pub guest_artifacts_dir: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &TestvmConfig) -> Self {
        let interval = Duration::from_secs(config.readiness.poll_interval_secs);
        Self {
            graceful_stop_timeout: config.timeouts.graceful_stop(),
            stop_poll_interval: interval,
            short_readiness: ReadinessProfile::short(config.readiness.short_attempts, interval),
            long_readiness: ReadinessProfile::long(config.readiness.long_attempts, interval),
            probe_command: config.readiness.probe_command.clone(),
            sync_step: config.provision.sync_step.clone(),
            guest_artifacts_dir: config.paths.guest_artifacts_dir.clone(),
        }
    }

    /// Default profile sizes with every wait removed.
    #[cfg(test)]
    pub fn immediate() -> Self {
        let mut settings = Self::from_config(&TestvmConfig::default());
        settings.graceful_stop_timeout = Duration::ZERO;
        settings.stop_poll_interval = Duration::ZERO;
        settings.short_readiness.poll_interval = Duration::ZERO;
        settings.long_readiness.poll_interval = Duration::ZERO;
        settings
    }
}

/// Drives one named machine through a controller.
pub struct Orchestrator<C: VmController> {
    pub(crate) controller: C,
    pub(crate) machine: MachineName,
    pub(crate) settings: OrchestratorSettings,
}

impl<C: VmController> Orchestrator<C> {
    pub fn new(controller: C, machine: MachineName, settings: OrchestratorSettings) -> Self {
        Self {
            controller,
            machine,
            settings,
        }
    }

    pub fn machine(&self) -> &MachineName {
        &self.machine
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use testvm_common::MockVmController;

    pub fn orchestrator(mock: MockVmController) -> Orchestrator<MockVmController> {
        Orchestrator::new(mock, MachineName::new("testvm"), OrchestratorSettings::immediate())
    }
}
