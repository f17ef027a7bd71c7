//! Fallback restoration protocol: bring the machine to a ready, known state
//! as fast as the available baselines allow.
//!
//! Clean is preferred whenever it exists; Pristine is used only when it is
//! the sole baseline. A baseline that cannot be restored or started falls
//! through to the best-effort tier (current state, no isolation guarantee).
//! A guest that boots but never becomes ready is a hard failure at whatever
//! tier got it there: no lower tier is tried.

use crate::orchestrator::Orchestrator;
use serde::Serialize;
use testvm_common::{
    CLEAN_SNAPSHOT, OperationOutcome, OrchestratorError, PRISTINE_SNAPSHOT, SnapshotTier,
    VmController,
};
use tracing::{info, warn};

pub const NO_BASELINE_WARNING: &str =
    "no baseline snapshot used; test isolation is not guaranteed for this run";

/// How the machine was made ready.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadyReport {
    /// Baseline restored, `None` for the best-effort tier.
    pub tier: Option<SnapshotTier>,
    /// One entry per baseline that was tried and abandoned.
    pub fallbacks: Vec<String>,
    pub warnings: Vec<String>,
}

impl ReadyReport {
    pub fn baseline_used(&self) -> bool {
        self.tier.is_some()
    }

    pub fn tier_label(&self) -> &str {
        self.tier.as_ref().map_or("current-state", |t| t.name())
    }

    /// Sub-outcomes to append to the command's session.
    pub fn steps(&self) -> Vec<(String, OperationOutcome)> {
        let mut steps: Vec<_> = self
            .fallbacks
            .iter()
            .map(|f| ("fallback".to_string(), OperationOutcome::partial(f.clone())))
            .collect();
        steps.push((format!("tier:{}", self.tier_label()), OperationOutcome::Success));
        steps
    }
}

impl<C: VmController> Orchestrator<C> {
    /// Run the restoration protocol, then sync the latest test payload.
    pub fn prepare_ready(&self) -> Result<ReadyReport, OrchestratorError> {
        let mut report = ReadyReport::default();

        match self.select_baseline(&mut report) {
            Some(tier) => match self.restore_and_boot(&tier) {
                Ok(()) => {
                    self.require_ready(&self.settings.long_readiness)?;
                    info!(machine = %self.machine, tier = %tier, "Restored baseline");
                    report.tier = Some(tier);
                }
                Err(e) if e.allows_fallback() => {
                    warn!(machine = %self.machine, tier = %tier, error = %e, "Baseline unusable, falling back");
                    report
                        .fallbacks
                        .push(format!("restore of '{}' failed: {e}", tier.name()));
                    self.best_effort(&mut report)?;
                }
                Err(e) => return Err(e),
            },
            None => self.best_effort(&mut report)?,
        }

        info!(machine = %self.machine, step = %self.settings.sync_step, "Syncing test payload");
        self.controller
            .provision(&self.machine, Some(&self.settings.sync_step))?;
        Ok(report)
    }

    /// Clean if it exists, otherwise Pristine if it exists.
    fn select_baseline(&self, report: &mut ReadyReport) -> Option<SnapshotTier> {
        for name in [CLEAN_SNAPSHOT, PRISTINE_SNAPSHOT] {
            match self.snapshot_exists(name) {
                Ok(true) => return Some(SnapshotTier::from_name(name)),
                Ok(false) => {}
                Err(e) => {
                    warn!(machine = %self.machine, snapshot = name, error = %e, "Cannot check baseline");
                    report
                        .fallbacks
                        .push(format!("could not check for '{name}': {e}"));
                    return None;
                }
            }
        }
        None
    }

    fn restore_and_boot(&self, tier: &SnapshotTier) -> Result<(), OrchestratorError> {
        self.restore_snapshot(tier.name())?;
        self.ensure_running()
    }

    fn best_effort(&self, report: &mut ReadyReport) -> Result<(), OrchestratorError> {
        self.ensure_running()?;
        self.require_ready(&self.settings.long_readiness)?;
        warn!(machine = %self.machine, "{NO_BASELINE_WARNING}");
        report.warnings.push(NO_BASELINE_WARNING.to_string());
        Ok(())
    }
}
