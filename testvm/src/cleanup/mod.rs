//! Cleanup level engine: six graduated levels of destructive cleanup.
//!
//! Data levels and the guest-data level are best effort. The snapshot reset
//! requires the Clean baseline. Rebuild and nuclear reset are irreversible
//! and run only after explicit confirmation, or unconditionally in force
//! mode, where no prompt is issued at all.

pub mod host;

use crate::confirm::Confirm;
use crate::orchestrator::Orchestrator;
use host::{HostArtifacts, HostScope, HostSweep};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use testvm_common::config::guest_dir_problem;
use testvm_common::{
    CLEAN_SNAPSHOT, CleanupLevel, MachineState, OperationOutcome, OrchestratorError,
    SnapshotTier, VmController,
};
use tracing::{info, warn};

/// What a cleanup run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub level: CleanupLevel,
    /// Host files removed.
    pub removed: Vec<PathBuf>,
    pub bytes_freed: u64,
    /// Steps skipped because there was nothing to act on.
    pub skipped: Vec<String>,
    /// Machine-side actions performed.
    pub actions: Vec<String>,
    /// Best-effort steps that failed.
    pub failures: Vec<String>,
}

impl CleanupReport {
    fn new(level: CleanupLevel) -> Self {
        Self {
            level,
            removed: Vec::new(),
            bytes_freed: 0,
            skipped: Vec::new(),
            actions: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn absorb(&mut self, sweep: HostSweep) {
        self.removed.extend(sweep.removed);
        self.bytes_freed += sweep.bytes_freed;
        self.skipped
            .extend(sweep.skipped.into_iter().map(|d| format!("host dir '{d}' missing")));
        self.failures.extend(sweep.errors);
    }

    pub fn outcome(&self) -> OperationOutcome {
        if self.failures.is_empty() {
            OperationOutcome::Success
        } else {
            OperationOutcome::partial(self.failures.join("; "))
        }
    }
}

/// Host-side inputs to the data levels.
#[derive(Debug, Clone)]
pub struct HostPolicy {
    pub artifacts: HostArtifacts,
    pub basic_max_age: Duration,
}

impl HostPolicy {
    pub fn sweep(&self, level: CleanupLevel) -> HostSweep {
        let scope = match level {
            CleanupLevel::DataBasic => HostScope::OlderThan(self.basic_max_age),
            _ => HostScope::Everything,
        };
        self.artifacts.sweep(scope)
    }
}

impl<C: VmController> Orchestrator<C> {
    pub fn run_cleanup(
        &self,
        level: CleanupLevel,
        host: &HostPolicy,
        confirm: &dyn Confirm,
        force: bool,
    ) -> Result<CleanupReport, OrchestratorError> {
        if level.requires_confirmation() && !force {
            let prompt = format!(
                "{level} on machine '{}': {}. This cannot be undone.",
                self.machine,
                level.summary()
            );
            if !confirm.confirm(&prompt)? {
                info!(%level, "Cleanup declined");
                return Err(OrchestratorError::ConfirmationDeclined {
                    operation: level.to_string(),
                });
            }
        }

        info!(%level, machine = %self.machine, force, "Running cleanup");
        let mut report = CleanupReport::new(level);
        match level {
            CleanupLevel::DataBasic | CleanupLevel::DataFull => {
                report.absorb(host.sweep(level));
            }
            CleanupLevel::VmInternalData => self.clean_guest_data(&mut report),
            CleanupLevel::VmSnapshotReset => self.snapshot_reset(&mut report)?,
            CleanupLevel::VmRebuild => self.rebuild(&mut report)?,
            CleanupLevel::NuclearReset => {
                report.absorb(host.sweep(CleanupLevel::DataFull));
                self.nuclear_reset(&mut report);
            }
        }
        Ok(report)
    }

    fn clean_guest_data(&self, report: &mut CleanupReport) {
        if self.probe() != MachineState::Running {
            report
                .skipped
                .push("guest data: machine is not running".to_string());
            return;
        }
        let configured = &self.settings.guest_artifacts_dir;
        if let Some(problem) = guest_dir_problem(configured) {
            warn!(dir = %configured, problem, "Refusing to clear guest directory");
            report
                .failures
                .push(format!("guest cleanup refused for '{configured}': {problem}"));
            return;
        }
        let dir = configured.trim().trim_end_matches('/');
        let command = format!("rm -rf -- {}/*", shell_quote(dir));
        match self.controller.guest_exec(&self.machine, &command) {
            Ok(output) if output.success => report.actions.push(format!("cleared {dir}")),
            Ok(output) => report
                .failures
                .push(format!("guest cleanup failed: {}", output.stderr.trim())),
            Err(e) => report.failures.push(format!("guest cleanup failed: {e}")),
        }
    }

    /// Stop, restore Clean, start. Nothing is touched when Clean is missing.
    fn snapshot_reset(&self, report: &mut CleanupReport) -> Result<(), OrchestratorError> {
        if !self.snapshot_exists(CLEAN_SNAPSHOT)? {
            return Err(OrchestratorError::Precondition {
                operation: CleanupLevel::VmSnapshotReset.to_string(),
                message: format!("machine '{}' has no clean snapshot", self.machine),
                remediation: "run `testvm vm-init` to create a clean baseline".to_string(),
            });
        }
        self.restore_snapshot(CLEAN_SNAPSHOT)?;
        report.actions.push(format!("restored '{CLEAN_SNAPSHOT}'"));
        self.ensure_running()?;
        self.require_ready(&self.settings.short_readiness)?;
        report.actions.push("machine running".to_string());
        Ok(())
    }

    fn rebuild(&self, report: &mut CleanupReport) -> Result<(), OrchestratorError> {
        if self.probe().exists() {
            self.controller.destroy(&self.machine)?;
            report.actions.push("destroyed machine".to_string());
        }
        // A fresh machine is provisioned from scratch as part of creation.
        self.controller.create_and_start(&self.machine)?;
        report.actions.push("created and provisioned machine".to_string());
        self.require_ready(&self.settings.short_readiness)?;
        self.create_baseline(&SnapshotTier::Clean)?;
        report.actions.push(format!("created '{CLEAN_SNAPSHOT}' baseline"));
        Ok(())
    }

    /// Every step is attempted even after an earlier one fails.
    fn nuclear_reset(&self, report: &mut CleanupReport) {
        let exists = self.probe().exists();
        if exists {
            match self.list_snapshots() {
                Ok(snapshots) => {
                    for snapshot in snapshots {
                        match self.delete_snapshot(&snapshot.name) {
                            Ok(()) => report
                                .actions
                                .push(format!("deleted snapshot '{}'", snapshot.name)),
                            Err(e) => report
                                .failures
                                .push(format!("delete snapshot '{}': {e}", snapshot.name)),
                        }
                    }
                }
                Err(e) => report.failures.push(format!("list snapshots: {e}")),
            }

            if self.probe() == MachineState::Running {
                match self.controller.power_off(&self.machine) {
                    Ok(()) => report.actions.push("powered off machine".to_string()),
                    Err(e) => {
                        warn!(error = %e, "Power off before destroy failed");
                        report.failures.push(format!("power off: {e}"));
                    }
                }
            }
            match self.controller.destroy(&self.machine) {
                Ok(()) => report.actions.push("destroyed machine".to_string()),
                Err(e) => report.failures.push(format!("destroy: {e}")),
            }
        } else {
            report.skipped.push("machine does not exist".to_string());
        }

        match self.controller.remove_base_image(&self.machine) {
            Ok(()) => report.actions.push("removed cached base image".to_string()),
            Err(e) => report.failures.push(format!("remove base image: {e}")),
        }
    }
}

/// Single-quote `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
