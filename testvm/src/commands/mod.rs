//! Top-level command handlers.
//!
//! Handlers are the only place sessions are opened: [`CommandContext::run`]
//! opens one session per command, takes the machine lock for mutating
//! commands, and closes the session with the final outcome and the machine
//! state observed at the end.

pub mod cleanup;
pub mod helpers;
pub mod history;
pub mod vm;

use crate::cleanup::HostPolicy;
use crate::confirm::Confirm;
use crate::lock::MachineLock;
use crate::orchestrator::Orchestrator;
use serde_json::Value;
use std::path::PathBuf;
use testvm_common::{
    OperationOutcome, OrchestratorError, SessionHandle, SessionLog, VmController,
};
use tracing::{debug, warn};

/// What a command touches, which decides locking and the closing probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub locks: bool,
    pub touches_machine: bool,
}

impl Access {
    pub const READ_HOST: Self = Self {
        locks: false,
        touches_machine: false,
    };
    pub const READ_MACHINE: Self = Self {
        locks: false,
        touches_machine: true,
    };
    pub const WRITE_HOST: Self = Self {
        locks: true,
        touches_machine: false,
    };
    pub const WRITE_MACHINE: Self = Self {
        locks: true,
        touches_machine: true,
    };
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub outcome: OperationOutcome,
    pub message: String,
    pub data: Value,
    /// Overrides the exit status derived from `outcome`.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self {
            outcome: OperationOutcome::Success,
            message: message.into(),
            data,
            exit_code: None,
        }
    }

    pub fn with_outcome(mut self, outcome: OperationOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
            .unwrap_or(if self.outcome.is_success() { 0 } else { 1 })
    }
}

/// Everything a handler needs, built once in `main`.
pub struct CommandContext<C: VmController> {
    pub orchestrator: Orchestrator<C>,
    pub sessions: SessionLog,
    pub host: HostPolicy,
    pub confirm: Box<dyn Confirm>,
    pub force: bool,
    pub locks_dir: PathBuf,
    pub tests_command: Vec<String>,
}

impl<C: VmController> CommandContext<C> {
    /// Run `body` inside a session, holding the machine lock if `access`
    /// says so. A declined confirmation is closed as a non-failure.
    pub fn run<F>(
        &self,
        operation: &str,
        access: Access,
        body: F,
    ) -> Result<CommandOutput, OrchestratorError>
    where
        F: FnOnce(&SessionHandle) -> Result<CommandOutput, OrchestratorError>,
    {
        let session = self.sessions.open(operation).map_err(|e| {
            OrchestratorError::host(
                "failed to open session log",
                std::io::Error::other(e.to_string()),
            )
        })?;

        let result = self.locked(access, || body(&session));

        let state = access.touches_machine.then(|| self.orchestrator.probe());
        let outcome = match &result {
            Ok(output) => output.outcome.clone(),
            Err(e) if e.is_declined() => OperationOutcome::partial(format!("{e}; nothing changed")),
            Err(e) => e.outcome(),
        };
        if let Err(e) = session.close(state, outcome) {
            warn!(operation, error = %e, "Failed to close session log");
        }
        result
    }

    fn locked<T>(
        &self,
        access: Access,
        f: impl FnOnce() -> Result<T, OrchestratorError>,
    ) -> Result<T, OrchestratorError> {
        let _lock = if access.locks {
            Some(MachineLock::acquire(
                &self.locks_dir,
                self.orchestrator.machine(),
            )?)
        } else {
            None
        };
        f()
    }
}

/// Append a sub-outcome; a session write failure never fails the command.
pub(crate) fn record(session: &SessionHandle, step: &str, outcome: OperationOutcome) {
    debug!(step, %outcome, "Recording step");
    if let Err(e) = session.append(step, outcome) {
        warn!(step, error = %e, "Failed to append session step");
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::context;
    use super::*;
    use crate::confirm::scripted::ScriptedConfirm;
    use tempfile::TempDir;
    use testvm_common::{MachineState, MockVmController};
    use testvm_common::session::EntryKind;

    #[test]
    fn test_run_opens_and_closes_one_session() {
        let dir = TempDir::new().unwrap();
        let ctx = context(
            &dir,
            MockVmController::new().with_state(MachineState::Running),
            Box::new(ScriptedConfirm::default()),
            false,
        );
        let mut seen = Vec::new();
        ctx.run("vm-status", Access::READ_MACHINE, |session| {
            record(session, "probe", OperationOutcome::Success);
            seen = session.entries();
            Ok(CommandOutput::success("ok", Value::Null))
        })
        .unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, EntryKind::Open);

        let history = testvm_common::read_history(&dir.path().join("sessions"), 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].machine_state, Some(MachineState::Running));
        assert_eq!(history[0].outcome, Some(OperationOutcome::Success));
    }

    #[test]
    fn test_error_closes_session_with_hard_failure() {
        let dir = TempDir::new().unwrap();
        let ctx = context(
            &dir,
            MockVmController::new(),
            Box::new(ScriptedConfirm::default()),
            false,
        );
        let err = ctx
            .run("vm-list", Access::READ_MACHINE, |_| {
                Err(OrchestratorError::machine_not_found("testvm"))
            })
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound { .. }));
        let history = testvm_common::read_history(&dir.path().join("sessions"), 10).unwrap();
        assert!(matches!(
            history[0].outcome,
            Some(OperationOutcome::HardFailure { .. })
        ));
    }

    #[test]
    fn test_mutating_command_fails_while_lock_held() {
        let dir = TempDir::new().unwrap();
        let ctx = context(
            &dir,
            MockVmController::new(),
            Box::new(ScriptedConfirm::default()),
            false,
        );
        let _held = MachineLock::acquire(&ctx.locks_dir, ctx.orchestrator.machine()).unwrap();
        let err = ctx
            .run("vm-start", Access::WRITE_MACHINE, |_| {
                Ok(CommandOutput::success("ran", Value::Null))
            })
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::LockHeld { .. }));

        // Reads still go through.
        ctx.run("vm-status", Access::READ_MACHINE, |_| {
            Ok(CommandOutput::success("ok", Value::Null))
        })
        .unwrap();
    }

    #[test]
    fn test_exit_code_follows_outcome_unless_overridden() {
        let ok = CommandOutput::success("", Value::Null);
        assert_eq!(ok.exit_code(), 0);
        let failed = ok.clone().with_outcome(OperationOutcome::hard("x", "y"));
        assert_eq!(failed.exit_code(), 1);
        let tests = CommandOutput {
            exit_code: Some(3),
            ..ok
        };
        assert_eq!(tests.exit_code(), 3);
    }
}
