//! Snapshot registry: named snapshots of the managed machine.
//!
//! The registry reports the first failure upward and never retries; deciding
//! whether to fall back is the caller's job.

use crate::orchestrator::Orchestrator;
use chrono::Utc;
use testvm_common::{
    ControllerError, MachineState, OrchestratorError, SnapshotInfo, SnapshotTier, VmController,
};
use tracing::{info, warn};

impl<C: VmController> Orchestrator<C> {
    /// Whether `name` exists. A machine that does not exist has no snapshots.
    pub fn snapshot_exists(&self, name: &str) -> Result<bool, OrchestratorError> {
        if self.probe() == MachineState::NotFound {
            return Ok(false);
        }
        let snapshots = self.controller.list_snapshots(&self.machine)?;
        Ok(snapshots.iter().any(|s| s.name == name))
    }

    pub fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>, OrchestratorError> {
        if self.probe() == MachineState::NotFound {
            return Err(OrchestratorError::machine_not_found(self.machine.as_str()));
        }
        Ok(self.controller.list_snapshots(&self.machine)?)
    }

    /// Take a snapshot in the machine's current state.
    ///
    /// Snapshot names are mutable tags: an existing snapshot of the same name
    /// is deleted and replaced without comparing contents.
    pub fn create_snapshot(&self, name: &str, description: &str) -> Result<(), OrchestratorError> {
        if self.probe() == MachineState::NotFound {
            return Err(OrchestratorError::machine_not_found(self.machine.as_str()));
        }
        if self.snapshot_exists(name)? {
            warn!(machine = %self.machine, snapshot = name, "Overwriting existing snapshot");
            self.controller.delete_snapshot(&self.machine, name)?;
        }
        self.controller
            .take_snapshot(&self.machine, name, description)?;
        info!(machine = %self.machine, snapshot = name, "Snapshot created");
        Ok(())
    }

    /// Restore `name`, stopping the machine first if it is running. The
    /// machine is left stopped.
    pub fn restore_snapshot(&self, name: &str) -> Result<(), OrchestratorError> {
        if self.probe() == MachineState::NotFound {
            return Err(OrchestratorError::machine_not_found(self.machine.as_str()));
        }
        if !self.snapshot_exists(name)? {
            return Err(OrchestratorError::snapshot_not_found(name));
        }

        self.graceful_stop()?;
        if self.probe() == MachineState::Running {
            return Err(ControllerError::failed(
                "restore_snapshot",
                format!("machine '{}' is running; refusing to restore '{name}'", self.machine),
            )
            .into());
        }

        info!(machine = %self.machine, snapshot = name, "Restoring snapshot");
        self.controller.restore_snapshot(&self.machine, name)?;
        Ok(())
    }

    pub fn delete_snapshot(&self, name: &str) -> Result<(), OrchestratorError> {
        if !self.snapshot_exists(name)? {
            return Err(OrchestratorError::snapshot_not_found(name));
        }
        self.controller.delete_snapshot(&self.machine, name)?;
        info!(machine = %self.machine, snapshot = name, "Snapshot deleted");
        Ok(())
    }

    /// Capture a Pristine or Clean baseline. Baselines are always taken from
    /// a stopped machine; a machine that was running is started again.
    pub fn create_baseline(&self, tier: &SnapshotTier) -> Result<(), OrchestratorError> {
        let was_running = match self.probe() {
            MachineState::NotFound => {
                return Err(OrchestratorError::machine_not_found(self.machine.as_str()));
            }
            state => state == MachineState::Running,
        };

        self.graceful_stop()?;
        self.create_snapshot(tier.name(), &baseline_description(tier))?;

        if was_running {
            self.ensure_running()?;
        }
        Ok(())
    }
}

fn baseline_description(tier: &SnapshotTier) -> String {
    let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    match tier {
        SnapshotTier::Pristine => format!("Pristine baseline for distribution, captured {stamp}"),
        SnapshotTier::Clean => format!("Clean baseline, captured {stamp}"),
        SnapshotTier::Custom(name) => format!("Snapshot '{name}', captured {stamp}"),
    }
}

#[cfg(test)]
mod tests {
    use crate::orchestrator::test_support::orchestrator;
    use testvm_common::{
        MachineState, MockOp, MockVmController, OrchestratorError, SnapshotTier,
    };

    #[test]
    fn test_exists_on_missing_machine_is_false_without_listing() {
        let orch = orchestrator(MockVmController::new());
        assert!(!orch.snapshot_exists("clean").unwrap());
        assert_eq!(orch.controller().call_count(MockOp::ListSnapshots), 0);
    }

    #[test]
    fn test_create_overwrites_existing_name() {
        let orch = orchestrator(
            MockVmController::new()
                .with_state(MachineState::Stopped)
                .with_snapshot("before-upgrade", "old"),
        );
        orch.create_snapshot("before-upgrade", "new").unwrap();
        assert_eq!(orch.controller().snapshot_names(), vec!["before-upgrade"]);
        assert_eq!(
            orch.controller()
                .calls_with_arg(MockOp::DeleteSnapshot, "before-upgrade"),
            1
        );
    }

    #[test]
    fn test_restore_running_machine_stops_first() {
        let orch = orchestrator(
            MockVmController::new()
                .with_state(MachineState::Running)
                .with_snapshot("clean", ""),
        );
        orch.restore_snapshot("clean").unwrap();
        assert!(orch.controller().violations().is_empty());
        let restore = orch
            .controller()
            .calls()
            .into_iter()
            .find(|c| c.op == MockOp::RestoreSnapshot)
            .unwrap();
        assert_eq!(restore.state_before, MachineState::Stopped);
    }

    #[test]
    fn test_restore_with_stubborn_guest_powers_off_first() {
        let orch = orchestrator(
            MockVmController::new()
                .with_state(MachineState::Running)
                .ignoring_graceful_stop()
                .with_snapshot("clean", ""),
        );
        orch.restore_snapshot("clean").unwrap();
        assert_eq!(orch.controller().call_count(MockOp::PowerOff), 1);
        assert!(orch.controller().violations().is_empty());
    }

    #[test]
    fn test_restore_missing_snapshot_is_not_found() {
        let orch = orchestrator(MockVmController::new().with_state(MachineState::Running));
        let err = orch.restore_snapshot("clean").unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
        // Nothing is stopped for a snapshot that is not there.
        assert_eq!(orch.controller().call_count(MockOp::Stop), 0);
    }

    #[test]
    fn test_restore_failure_carries_raw_diagnostic() {
        let orch = orchestrator(
            MockVmController::new()
                .with_state(MachineState::Stopped)
                .with_snapshot("clean", "")
                .with_corrupt_snapshot("clean"),
        );
        let err = orch.restore_snapshot("clean").unwrap_err();
        assert!(err.to_string().contains("VERR_VD_IMAGE_CORRUPTED"));
    }

    #[test]
    fn test_list_missing_machine_names_vm_init() {
        let orch = orchestrator(MockVmController::new());
        let err = orch.list_snapshots().unwrap_err();
        assert!(err.remediation().contains("vm-init"));
    }

    #[test]
    fn test_delete_unknown_snapshot_is_not_found() {
        let orch = orchestrator(MockVmController::new().with_state(MachineState::Stopped));
        assert!(matches!(
            orch.delete_snapshot("nope"),
            Err(OrchestratorError::NotFound { .. })
        ));
    }

    #[test]
    fn test_baseline_from_running_machine_is_taken_stopped_and_restarts() {
        let orch = orchestrator(MockVmController::new().with_state(MachineState::Running));
        orch.create_baseline(&SnapshotTier::Clean).unwrap();

        let take = orch
            .controller()
            .calls()
            .into_iter()
            .find(|c| c.op == MockOp::TakeSnapshot)
            .unwrap();
        assert_eq!(take.state_before, MachineState::Stopped);
        assert_eq!(take.arg.as_deref(), Some("clean"));
        assert_eq!(orch.controller().state(), MachineState::Running);
    }

    #[test]
    fn test_baseline_from_stopped_machine_stays_stopped() {
        let orch = orchestrator(MockVmController::new().with_state(MachineState::Stopped));
        orch.create_baseline(&SnapshotTier::Pristine).unwrap();
        assert_eq!(orch.controller().snapshot_names(), vec!["pristine"]);
        assert_eq!(orch.controller().state(), MachineState::Stopped);
    }
}
