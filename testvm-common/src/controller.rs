//! The VM controller seam.
//!
//! The orchestrator never talks to the hypervisor directly; it sequences calls
//! against an implementation of [`VmController`]. The production implementation
//! drives Vagrant and VBoxManage, tests use [`crate::mock::MockVmController`].

use crate::types::{MachineName, MachineState, SnapshotInfo};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a VM controller call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// The controller tooling is not installed or cannot be executed.
    #[error("VM controller unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete within its configured timeout.
    #[error("`{operation}` timed out after {}s", after.as_secs())]
    Timeout { operation: String, after: Duration },

    /// The call ran and failed; `diagnostic` is the controller's raw output.
    #[error("`{operation}` failed: {diagnostic}")]
    Failed {
        operation: String,
        diagnostic: String,
    },

    /// The call succeeded but its output could not be understood.
    #[error("could not parse output of `{operation}`: {detail}")]
    Parse { operation: String, detail: String },
}

impl ControllerError {
    pub fn failed(operation: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::Failed {
            operation: operation.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Name of the controller operation that failed.
    pub fn operation(&self) -> &str {
        match self {
            Self::Unavailable(_) => "controller",
            Self::Timeout { operation, .. }
            | Self::Failed { operation, .. }
            | Self::Parse { operation, .. } => operation,
        }
    }
}

/// Output of a command executed inside the guest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GuestOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Operations the orchestrator needs from the hypervisor/provisioning toolchain.
///
/// Implementations must not retry or fall back internally; the first failure
/// is reported upward. `start` and `restore_snapshot` are not idempotent:
/// starting a running machine or restoring one that is running is an error.
pub trait VmController: Send + Sync {
    fn machine_state(&self, machine: &MachineName) -> Result<MachineState, ControllerError>;

    /// Create the machine if needed and boot it (initial provisioning included).
    fn create_and_start(&self, machine: &MachineName) -> Result<(), ControllerError>;

    fn start(&self, machine: &MachineName) -> Result<(), ControllerError>;

    /// Request a graceful (ACPI) shutdown.
    fn stop(&self, machine: &MachineName) -> Result<(), ControllerError>;

    /// Cut power immediately.
    fn power_off(&self, machine: &MachineName) -> Result<(), ControllerError>;

    fn destroy(&self, machine: &MachineName) -> Result<(), ControllerError>;

    fn take_snapshot(
        &self,
        machine: &MachineName,
        name: &str,
        description: &str,
    ) -> Result<(), ControllerError>;

    fn restore_snapshot(&self, machine: &MachineName, name: &str) -> Result<(), ControllerError>;

    fn delete_snapshot(&self, machine: &MachineName, name: &str) -> Result<(), ControllerError>;

    fn list_snapshots(&self, machine: &MachineName) -> Result<Vec<SnapshotInfo>, ControllerError>;

    /// Run one named provisioning step, or every step when `step` is `None`.
    fn provision(&self, machine: &MachineName, step: Option<&str>) -> Result<(), ControllerError>;

    /// Run a shell command inside the guest.
    fn guest_exec(&self, machine: &MachineName, command: &str)
    -> Result<GuestOutput, ControllerError>;

    /// Remove the locally cached base image the machine was built from.
    fn remove_base_image(&self, machine: &MachineName) -> Result<(), ControllerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_includes_seconds() {
        let err = ControllerError::Timeout {
            operation: "vagrant halt".into(),
            after: Duration::from_secs(90),
        };
        assert_eq!(err.to_string(), "`vagrant halt` timed out after 90s");
        assert_eq!(err.operation(), "vagrant halt");
    }

    #[test]
    fn test_failed_keeps_raw_diagnostic() {
        let err = ControllerError::failed("VBoxManage snapshot restore", "VERR_FILE_NOT_FOUND");
        assert!(err.to_string().contains("VERR_FILE_NOT_FOUND"));
    }
}
