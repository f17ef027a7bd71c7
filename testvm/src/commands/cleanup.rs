//! Cleanup commands: the interactive menu and the direct level entries.

use super::helpers::humanize_bytes;
use super::{Access, CommandContext, CommandOutput, record};
use crate::cleanup::CleanupReport;
use serde_json::json;
use testvm_common::{CleanupLevel, OrchestratorError, VmController};

/// Run one cleanup level. When `level` is `None` the operator picks from the
/// menu; in force mode there is no menu and a level must be given.
pub fn cleanup<C: VmController>(
    ctx: &CommandContext<C>,
    operation: &str,
    level: Option<CleanupLevel>,
) -> Result<CommandOutput, OrchestratorError> {
    let access = match level {
        Some(CleanupLevel::DataBasic | CleanupLevel::DataFull) => Access::WRITE_HOST,
        _ => Access::WRITE_MACHINE,
    };
    ctx.run(operation, access, |session| {
        let level = match level {
            Some(level) => level,
            None if ctx.force => {
                return Err(OrchestratorError::Precondition {
                    operation: operation.to_string(),
                    message: "no cleanup level given and the menu is disabled by --force"
                        .to_string(),
                    remediation: "pass --level <level> or use a cleanup-* command".to_string(),
                });
            }
            None => ctx
                .confirm
                .choose_level(&CleanupLevel::all())?
                .ok_or_else(|| OrchestratorError::ConfirmationDeclined {
                    operation: operation.to_string(),
                })?,
        };

        let report = ctx.orchestrator.run_cleanup(
            level,
            &ctx.host,
            ctx.confirm.as_ref(),
            ctx.force,
        )?;
        let outcome = report.outcome();
        record(session, level.as_str(), outcome.clone());
        Ok(CommandOutput::success(summarize(&report), json!(report)).with_outcome(outcome))
    })
}

fn summarize(report: &CleanupReport) -> String {
    let mut lines = vec![format!("{} finished", report.level)];
    if !report.removed.is_empty() || report.bytes_freed > 0 {
        lines.push(format!(
            "removed {} host files ({})",
            report.removed.len(),
            humanize_bytes(report.bytes_freed)
        ));
    }
    lines.extend(report.actions.iter().cloned());
    lines.extend(report.skipped.iter().map(|s| format!("skipped: {s}")));
    lines.extend(report.failures.iter().map(|f| format!("failed: {f}")));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::context;
    use crate::confirm::scripted::ScriptedConfirm;
    use std::fs;
    use tempfile::TempDir;
    use testvm_common::{MachineState, MockOp, MockVmController, OperationOutcome};

    #[test]
    fn test_menu_choice_runs_selected_level() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("results")).unwrap();
        fs::write(dir.path().join("results/run.tap"), "ok 1").unwrap();
        let ctx = context(
            &dir,
            MockVmController::new(),
            Box::new(ScriptedConfirm::choosing(Some(CleanupLevel::DataFull))),
            false,
        );
        let out = cleanup(&ctx, "cleanup", None).unwrap();
        assert_eq!(out.outcome, OperationOutcome::Success);
        assert!(!dir.path().join("results/run.tap").exists());
        assert_eq!(out.data["level"], "data-full");
    }

    #[test]
    fn test_menu_cancel_is_declined() {
        let dir = TempDir::new().unwrap();
        let ctx = context(
            &dir,
            MockVmController::new(),
            Box::new(ScriptedConfirm::choosing(None)),
            false,
        );
        let err = cleanup(&ctx, "cleanup", None).unwrap_err();
        assert!(err.is_declined());
    }

    #[test]
    fn test_force_without_level_never_shows_menu() {
        let dir = TempDir::new().unwrap();
        let ctx = context(
            &dir,
            MockVmController::new(),
            Box::new(ScriptedConfirm::choosing(Some(CleanupLevel::NuclearReset))),
            true,
        );
        let err = cleanup(&ctx, "cleanup", None).unwrap_err();
        assert!(matches!(err, OrchestratorError::Precondition { .. }));
        assert!(ctx.orchestrator.controller().calls().is_empty());
    }

    #[test]
    fn test_cleanup_all_forced_reports_partial_when_image_missing() {
        let dir = TempDir::new().unwrap();
        // No machine and no cached image: removing the image fails, nothing else to do.
        let ctx = context(
            &dir,
            MockVmController::new(),
            Box::new(ScriptedConfirm::default()),
            true,
        );
        let out = cleanup(&ctx, "cleanup-all", Some(CleanupLevel::NuclearReset)).unwrap();
        assert!(matches!(
            out.outcome,
            OperationOutcome::PartialFailureWithFallback { .. }
        ));
        assert_eq!(out.exit_code(), 0);
        assert_eq!(
            ctx.orchestrator
                .controller()
                .call_count(MockOp::RemoveBaseImage),
            1
        );
    }

    #[test]
    fn test_cleanup_vm_on_running_machine() {
        let dir = TempDir::new().unwrap();
        let ctx = context(
            &dir,
            MockVmController::new()
                .with_state(MachineState::Running)
                .with_guest_files(&["shot.png"]),
            Box::new(ScriptedConfirm::default()),
            false,
        );
        cleanup(&ctx, "cleanup-vm", Some(CleanupLevel::VmInternalData)).unwrap();
        assert!(ctx.orchestrator.controller().guest_files().is_empty());
    }
}
