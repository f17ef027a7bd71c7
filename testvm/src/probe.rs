//! VM state probe and the state transitions built directly on it.
//!
//! Every state-dependent action re-probes immediately beforehand; a state
//! observed earlier in the same command is never trusted, since operators can
//! start or stop the machine outside this tool.

use crate::orchestrator::Orchestrator;
use std::time::Instant;
use testvm_common::{ControllerError, MachineState, OrchestratorError, VmController};
use tracing::{debug, info, warn};

impl<C: VmController> Orchestrator<C> {
    /// Current machine state. Never fails: an unreachable or missing
    /// controller reports `NotFound`.
    pub fn probe(&self) -> MachineState {
        match self.controller.machine_state(&self.machine) {
            Ok(state) => {
                debug!(machine = %self.machine, %state, "Probed machine");
                state
            }
            Err(e) => {
                debug!(machine = %self.machine, error = %e, "Probe failed, treating as not found");
                MachineState::NotFound
            }
        }
    }

    /// Bring the machine to `Running`, creating it if it does not exist.
    pub fn ensure_running(&self) -> Result<(), OrchestratorError> {
        match self.probe() {
            MachineState::Running => {
                debug!(machine = %self.machine, "Already running");
                return Ok(());
            }
            MachineState::Stopped => {
                info!(machine = %self.machine, "Starting machine");
                self.controller.start(&self.machine)?;
            }
            MachineState::NotFound => {
                info!(machine = %self.machine, "Creating and starting machine");
                self.controller.create_and_start(&self.machine)?;
            }
        }

        match self.probe() {
            MachineState::Running => Ok(()),
            other => Err(ControllerError::failed(
                "start",
                format!("machine '{}' reports {other} after start", self.machine),
            )
            .into()),
        }
    }

    /// Stop the machine, asking nicely first and cutting power if it has not
    /// shut down within the graceful-stop timeout. Returns the final state.
    pub fn graceful_stop(&self) -> Result<MachineState, OrchestratorError> {
        let state = self.probe();
        if state != MachineState::Running {
            debug!(machine = %self.machine, %state, "Nothing to stop");
            return Ok(state);
        }

        info!(machine = %self.machine, "Requesting graceful shutdown");
        let stopped = match self.controller.stop(&self.machine) {
            Ok(()) => self.wait_until_not_running(),
            Err(e) => {
                warn!(machine = %self.machine, error = %e, "Graceful stop failed");
                false
            }
        };

        if !stopped {
            warn!(
                machine = %self.machine,
                timeout_secs = self.settings.graceful_stop_timeout.as_secs(),
                "Machine did not shut down gracefully, powering off"
            );
            self.power_off()?;
        }

        match self.probe() {
            MachineState::Running => Err(ControllerError::failed(
                "power_off",
                format!("machine '{}' is still running after power off", self.machine),
            )
            .into()),
            final_state => Ok(final_state),
        }
    }

    /// Cut power if the machine is running; no-op otherwise.
    pub fn power_off(&self) -> Result<(), OrchestratorError> {
        if self.probe() == MachineState::Running {
            self.controller.power_off(&self.machine)?;
        }
        Ok(())
    }

    fn wait_until_not_running(&self) -> bool {
        let deadline = Instant::now() + self.settings.graceful_stop_timeout;
        loop {
            if self.probe() != MachineState::Running {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.settings.stop_poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::orchestrator::test_support::orchestrator;
    use testvm_common::{MachineState, MockOp, MockVmController, OrchestratorError};

    #[test]
    fn test_probe_tolerates_missing_controller() {
        let orch = orchestrator(MockVmController::new().failing(MockOp::MachineState));
        assert_eq!(orch.probe(), MachineState::NotFound);
    }

    #[test]
    fn test_ensure_running_twice_never_starts_a_running_machine() {
        let orch = orchestrator(MockVmController::new().with_state(MachineState::Running));
        orch.ensure_running().unwrap();
        orch.ensure_running().unwrap();
        assert_eq!(orch.controller().call_count(MockOp::Start), 0);
        assert!(orch.controller().violations().is_empty());
    }

    #[test]
    fn test_ensure_running_starts_stopped_machine_once() {
        let orch = orchestrator(MockVmController::new().with_state(MachineState::Stopped));
        orch.ensure_running().unwrap();
        orch.ensure_running().unwrap();
        assert_eq!(orch.controller().call_count(MockOp::Start), 1);
        assert_eq!(orch.controller().state(), MachineState::Running);
    }

    #[test]
    fn test_ensure_running_creates_missing_machine() {
        let orch = orchestrator(MockVmController::new());
        orch.ensure_running().unwrap();
        assert_eq!(orch.controller().call_count(MockOp::CreateAndStart), 1);
        assert_eq!(orch.controller().call_count(MockOp::Start), 0);
    }

    #[test]
    fn test_ensure_running_reprobes_after_external_start() {
        let orch = orchestrator(MockVmController::new().with_state(MachineState::Stopped));
        // An operator starts the machine between two commands.
        orch.controller().set_state_externally(MachineState::Running);
        orch.ensure_running().unwrap();
        assert!(orch.controller().violations().is_empty());
    }

    #[test]
    fn test_ensure_running_reports_collaborator_failure() {
        let orch = orchestrator(
            MockVmController::new()
                .with_state(MachineState::Stopped)
                .failing(MockOp::Start),
        );
        let err = orch.ensure_running().unwrap_err();
        assert!(matches!(err, OrchestratorError::Collaborator { .. }));
    }

    #[test]
    fn test_graceful_stop_stops_without_power_off() {
        let orch = orchestrator(MockVmController::new().with_state(MachineState::Running));
        assert_eq!(orch.graceful_stop().unwrap(), MachineState::Stopped);
        assert_eq!(orch.controller().call_count(MockOp::Stop), 1);
        assert_eq!(orch.controller().call_count(MockOp::PowerOff), 0);
    }

    #[test]
    fn test_graceful_stop_falls_back_to_power_off() {
        let orch = orchestrator(
            MockVmController::new()
                .with_state(MachineState::Running)
                .ignoring_graceful_stop(),
        );
        assert_eq!(orch.graceful_stop().unwrap(), MachineState::Stopped);
        assert_eq!(orch.controller().call_count(MockOp::PowerOff), 1);
    }

    #[test]
    fn test_graceful_stop_power_off_after_stop_error() {
        let orch = orchestrator(
            MockVmController::new()
                .with_state(MachineState::Running)
                .failing(MockOp::Stop),
        );
        assert_eq!(orch.graceful_stop().unwrap(), MachineState::Stopped);
        assert_eq!(orch.controller().call_count(MockOp::PowerOff), 1);
    }

    #[test]
    fn test_graceful_stop_on_stopped_machine_is_noop() {
        let orch = orchestrator(MockVmController::new().with_state(MachineState::Stopped));
        assert_eq!(orch.graceful_stop().unwrap(), MachineState::Stopped);
        assert!(orch.controller().calls().is_empty());
    }

    #[test]
    fn test_graceful_stop_fails_when_power_off_fails() {
        let orch = orchestrator(
            MockVmController::new()
                .with_state(MachineState::Running)
                .ignoring_graceful_stop()
                .failing(MockOp::PowerOff),
        );
        assert!(orch.graceful_stop().is_err());
    }
}
