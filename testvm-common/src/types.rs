//! Common types used across testvm components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved snapshot name for the distribution-grade baseline.
pub const PRISTINE_SNAPSHOT: &str = "pristine";
/// Reserved snapshot name for the operator-maintained baseline.
pub const CLEAN_SNAPSHOT: &str = "clean";

/// Name of the machine managed by the VM controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineName(pub String);

impl MachineName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a machine as reported by the VM controller.
///
/// Always re-queried; a value of this type is only valid for the decision
/// it was probed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    /// The controller has no machine by that name (or is not installed).
    NotFound,
    /// The machine exists but is powered off, saved or aborted.
    Stopped,
    /// The machine is running.
    Running,
}

impl MachineState {
    pub fn exists(self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Snapshot baseline tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTier {
    Pristine,
    Clean,
    Custom(String),
}

impl SnapshotTier {
    /// Map a snapshot name onto its tier. The reserved names are matched
    /// case-sensitively, exactly as they are stored.
    pub fn from_name(name: &str) -> Self {
        match name {
            PRISTINE_SNAPSHOT => Self::Pristine,
            CLEAN_SNAPSHOT => Self::Clean,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Pristine => PRISTINE_SNAPSHOT,
            Self::Clean => CLEAN_SNAPSHOT,
            Self::Custom(name) => name,
        }
    }

    /// Pristine and Clean must be captured from a stopped machine.
    pub fn is_baseline(&self) -> bool {
        matches!(self, Self::Pristine | Self::Clean)
    }
}

impl fmt::Display for SnapshotTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A snapshot as listed by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl SnapshotInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    pub fn tier(&self) -> SnapshotTier {
        SnapshotTier::from_name(&self.name)
    }
}

/// Graduated destructive cleanup levels, least to most destructive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupLevel {
    /// Host-side artifacts older than the basic age threshold.
    DataBasic,
    /// Every host-side artifact.
    DataFull,
    /// Guest-side test artifacts (machine must be running).
    VmInternalData,
    /// Stop, restore the Clean snapshot, start.
    VmSnapshotReset,
    /// Destroy, recreate, provision and re-baseline the machine.
    VmRebuild,
    /// Everything: host data, snapshots, machine and cached base image.
    NuclearReset,
}

impl CleanupLevel {
    pub const fn all() -> [CleanupLevel; 6] {
        [
            Self::DataBasic,
            Self::DataFull,
            Self::VmInternalData,
            Self::VmSnapshotReset,
            Self::VmRebuild,
            Self::NuclearReset,
        ]
    }

    /// Levels that need an explicit "yes" unless force mode is on.
    pub const fn requires_confirmation(self) -> bool {
        matches!(self, Self::VmRebuild | Self::NuclearReset)
    }

    /// Only the snapshot reset can be undone, and only if Clean exists.
    pub const fn is_reversible(self) -> bool {
        matches!(self, Self::VmSnapshotReset)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataBasic => "data-basic",
            Self::DataFull => "data-full",
            Self::VmInternalData => "vm-internal-data",
            Self::VmSnapshotReset => "vm-snapshot-reset",
            Self::VmRebuild => "vm-rebuild",
            Self::NuclearReset => "nuclear-reset",
        }
    }

    pub const fn summary(self) -> &'static str {
        match self {
            Self::DataBasic => "Delete host logs/reports/results/artifacts older than a day",
            Self::DataFull => "Delete all host logs/reports/results/artifacts",
            Self::VmInternalData => "Delete test artifacts inside the running guest",
            Self::VmSnapshotReset => "Restore the VM to the clean snapshot",
            Self::VmRebuild => "Destroy and rebuild the VM from scratch (irreversible)",
            Self::NuclearReset => {
                "Delete all data, snapshots, the VM and the cached base image (irreversible)"
            }
        }
    }
}

impl fmt::Display for CleanupLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CleanupLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|level| level.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown cleanup level '{s}'"))
    }
}

/// Result of an orchestration operation or one of its steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    /// Part of the operation failed but a fallback path completed it.
    PartialFailureWithFallback { detail: String },
    /// The operation failed; `remediation` tells the operator what to run.
    HardFailure { reason: String, remediation: String },
}

impl OperationOutcome {
    pub fn partial(detail: impl Into<String>) -> Self {
        Self::PartialFailureWithFallback {
            detail: detail.into(),
        }
    }

    pub fn hard(reason: impl Into<String>, remediation: impl Into<String>) -> Self {
        Self::HardFailure {
            reason: reason.into(),
            remediation: remediation.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::HardFailure { .. })
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialFailureWithFallback { detail } => {
                write!(f, "partial failure with fallback: {detail}")
            }
            Self::HardFailure {
                reason,
                remediation,
            } => write!(f, "hard failure: {reason} (remediation: {remediation})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_tier_from_reserved_names() {
        assert_eq!(SnapshotTier::from_name("pristine"), SnapshotTier::Pristine);
        assert_eq!(SnapshotTier::from_name("clean"), SnapshotTier::Clean);
        assert_eq!(
            SnapshotTier::from_name("before-upgrade"),
            SnapshotTier::Custom("before-upgrade".to_string())
        );
        assert!(SnapshotTier::Clean.is_baseline());
        assert!(!SnapshotTier::Custom("x".into()).is_baseline());
    }

    #[test]
    fn test_cleanup_levels_are_ordered_by_scope() {
        let levels = CleanupLevel::all();
        for pair in levels.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(levels.len(), 6);
    }

    #[test]
    fn test_only_irreversible_vm_levels_need_confirmation() {
        let gated: Vec<_> = CleanupLevel::all()
            .into_iter()
            .filter(|l| l.requires_confirmation())
            .collect();
        assert_eq!(gated, vec![CleanupLevel::VmRebuild, CleanupLevel::NuclearReset]);
    }

    #[test]
    fn test_cleanup_level_parse_display() {
        for level in CleanupLevel::all() {
            assert_eq!(level.to_string().parse::<CleanupLevel>(), Ok(level));
        }
        assert!("everything".parse::<CleanupLevel>().is_err());
    }

    #[test]
    fn test_outcome_success_classes() {
        assert!(OperationOutcome::Success.is_success());
        assert!(OperationOutcome::partial("clean restore failed").is_success());
        assert!(!OperationOutcome::hard("boom", "run vm-init").is_success());
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_string(&OperationOutcome::hard("x", "y")).unwrap();
        assert!(json.contains("\"status\":\"hard_failure\""));
        assert!(json.contains("\"remediation\":\"y\""));
    }

    #[test]
    fn test_machine_state_display() {
        assert_eq!(MachineState::NotFound.to_string(), "not_found");
        assert_eq!(MachineState::Running.to_string(), "running");
        assert!(!MachineState::NotFound.exists());
        assert!(MachineState::Stopped.exists());
    }
}
