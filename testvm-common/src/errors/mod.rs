//! Error taxonomy for testvm.
//!
//! [`OrchestratorError`] is what every orchestration component returns. Only
//! the restoration protocol turns `NotFound`/`Collaborator` into a fallback;
//! everything else reaches the command handler unchanged, which prints the
//! remediation hint from the [`catalog`].

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use crate::controller::ControllerError;
use crate::types::OperationOutcome;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by orchestration components.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Machine or snapshot absent.
    #[error("{kind} '{name}' not found")]
    NotFound {
        kind: ResourceKind,
        name: String,
        remediation: String,
    },

    /// A VM controller call failed; `source` carries the raw diagnostic.
    #[error("VM controller error: {source}")]
    Collaborator {
        #[from]
        source: ControllerError,
    },

    /// The guest never became interactively usable.
    #[error("guest '{machine}' not interactively ready after {attempts} attempts")]
    ReadinessTimeout { machine: String, attempts: u32 },

    /// The operator answered no to a destructive confirmation.
    #[error("{operation} declined by operator")]
    ConfirmationDeclined { operation: String },

    #[error("cannot run {operation}: {message}")]
    Precondition {
        operation: String,
        message: String,
        remediation: String,
    },

    #[error("machine '{machine}' is locked by pid {pid} ({path})")]
    LockHeld {
        machine: String,
        pid: u32,
        path: PathBuf,
    },

    #[error("{context}: {source}")]
    Host {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// What a `NotFound` error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Machine,
    Snapshot,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Machine => write!(f, "machine"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

impl OrchestratorError {
    pub fn machine_not_found(machine: impl Into<String>) -> Self {
        Self::NotFound {
            kind: ResourceKind::Machine,
            name: machine.into(),
            remediation: "run `testvm vm-init` to create a clean baseline".to_string(),
        }
    }

    pub fn snapshot_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: ResourceKind::Snapshot,
            name: name.into(),
            remediation: "run `testvm vm-list` to see available snapshots".to_string(),
        }
    }

    pub fn host(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Host {
            context: context.into(),
            source,
        }
    }

    /// The catalog entry this error maps to.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound {
                kind: ResourceKind::Machine,
                ..
            } => ErrorCode::MachineNotFound,
            Self::NotFound {
                kind: ResourceKind::Snapshot,
                ..
            } => ErrorCode::SnapshotNotFound,
            Self::Collaborator { source } => match source {
                ControllerError::Timeout { .. } => ErrorCode::ControllerTimeout,
                ControllerError::Unavailable(_) => ErrorCode::ControllerUnavailable,
                ControllerError::Failed { .. } | ControllerError::Parse { .. } => {
                    ErrorCode::ControllerFailed
                }
            },
            Self::ReadinessTimeout { .. } => ErrorCode::ReadinessTimeout,
            Self::ConfirmationDeclined { .. } => ErrorCode::ConfirmationDeclined,
            Self::Precondition { operation, .. } if operation == "vm-snapshot-reset" => {
                ErrorCode::CleanSnapshotMissing
            }
            Self::Precondition { .. } => ErrorCode::PreconditionFailed,
            Self::LockHeld { .. } => ErrorCode::LockHeld,
            Self::Host { .. } => ErrorCode::HostIoError,
        }
    }

    /// Human-actionable hint: the specific one when the error carries it,
    /// otherwise the first catalog step.
    pub fn remediation(&self) -> String {
        match self {
            Self::NotFound { remediation, .. } | Self::Precondition { remediation, .. } => {
                remediation.clone()
            }
            other => other
                .code()
                .remediation()
                .first()
                .map(|s| (*s).to_string())
                .unwrap_or_default(),
        }
    }

    /// Declining is an operator decision, not a failure.
    pub fn is_declined(&self) -> bool {
        matches!(self, Self::ConfirmationDeclined { .. })
    }

    /// Whether the restoration protocol may fall back past this error.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Collaborator { .. })
    }

    pub fn outcome(&self) -> OperationOutcome {
        OperationOutcome::hard(self.to_string(), self.remediation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_maps_to_collaborator_timeout_code() {
        let err: OrchestratorError = ControllerError::Timeout {
            operation: "vagrant up".into(),
            after: Duration::from_secs(5),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::ControllerTimeout);
        assert!(err.allows_fallback());
    }

    #[test]
    fn test_precondition_for_snapshot_reset_names_vm_init() {
        let err = OrchestratorError::Precondition {
            operation: "vm-snapshot-reset".into(),
            message: "no clean snapshot".into(),
            remediation: "run `testvm vm-init` to create a clean baseline".into(),
        };
        assert_eq!(err.code(), ErrorCode::CleanSnapshotMissing);
        assert!(err.remediation().contains("vm-init"));
        assert!(!err.allows_fallback());
    }

    #[test]
    fn test_hard_failure_outcome_carries_remediation() {
        let err = OrchestratorError::ReadinessTimeout {
            machine: "testvm".into(),
            attempts: 30,
        };
        match err.outcome() {
            OperationOutcome::HardFailure { remediation, .. } => {
                assert!(!remediation.is_empty());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_declined_is_not_a_failure_class() {
        let err = OrchestratorError::ConfirmationDeclined {
            operation: "vm-rebuild".into(),
        };
        assert!(err.is_declined());
        assert!(!err.allows_fallback());
    }
}
