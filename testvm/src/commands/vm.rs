//! Machine lifecycle and snapshot commands.

use super::{Access, CommandContext, CommandOutput, record};
use crate::cleanup::host::tree_size;
use crate::lock::MachineLock;
use serde_json::json;
use std::process::Command;
use testvm_common::{
    CLEAN_SNAPSHOT, CleanupLevel, OperationOutcome, OrchestratorError, SnapshotTier, VmController,
};
use tracing::{info, warn};

type CommandResult = Result<CommandOutput, OrchestratorError>;

/// Probe the machine and report what is known about it.
pub fn vm_status<C: VmController>(ctx: &CommandContext<C>) -> CommandResult {
    ctx.run("vm-status", Access::READ_MACHINE, |_| {
        let orch = &ctx.orchestrator;
        let state = orch.probe();
        let snapshots: Vec<String> = if state.exists() {
            match orch.list_snapshots() {
                Ok(list) => list.into_iter().map(|s| s.name).collect(),
                Err(e) => {
                    warn!(error = %e, "Could not list snapshots for status");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        let locked_by = MachineLock::holder(&ctx.locks_dir, orch.machine());
        let host_bytes = tree_size(ctx.host.artifacts.root()).unwrap_or(0);

        Ok(CommandOutput::success(
            format!("Machine '{}' is {state}", orch.machine()),
            json!({
                "machine": orch.machine().as_str(),
                "state": state,
                "snapshots": snapshots,
                "locked_by": locked_by,
                "host_artifact_bytes": host_bytes,
            }),
        ))
    })
}

pub fn vm_start<C: VmController>(ctx: &CommandContext<C>) -> CommandResult {
    ctx.run("vm-start", Access::WRITE_MACHINE, |session| {
        let orch = &ctx.orchestrator;
        orch.ensure_running()?;
        let ready = orch.require_ready(&orch.settings().short_readiness)?;
        record(session, "start", OperationOutcome::Success);
        Ok(CommandOutput::success(
            format!("Machine '{}' is running", orch.machine()),
            json!({ "ready": ready }),
        ))
    })
}

pub fn vm_stop<C: VmController>(ctx: &CommandContext<C>) -> CommandResult {
    ctx.run("vm-stop", Access::WRITE_MACHINE, |_| {
        let orch = &ctx.orchestrator;
        let state = orch.graceful_stop()?;
        Ok(CommandOutput::success(
            format!("Machine '{}' is {state}", orch.machine()),
            json!({ "state": state }),
        ))
    })
}

/// Provision from scratch and capture both baselines.
pub fn vm_init<C: VmController>(ctx: &CommandContext<C>) -> CommandResult {
    ctx.run("vm-init", Access::WRITE_MACHINE, |session| {
        let orch = &ctx.orchestrator;
        let existed = orch.probe().exists();
        orch.ensure_running()?;
        record(session, "create", OperationOutcome::Success);

        // Creation provisions a new machine; an existing one is re-provisioned.
        if existed {
            orch.controller().provision(orch.machine(), None)?;
        }
        record(session, "provision", OperationOutcome::Success);
        orch.require_ready(&orch.settings().short_readiness)?;

        for tier in [SnapshotTier::Clean, SnapshotTier::Pristine] {
            orch.create_baseline(&tier)?;
            record(session, &format!("snapshot:{tier}"), OperationOutcome::Success);
        }
        info!(machine = %orch.machine(), "Machine initialised with clean and pristine baselines");
        Ok(CommandOutput::success(
            format!(
                "Machine '{}' provisioned; 'clean' and 'pristine' snapshots created",
                orch.machine()
            ),
            json!({ "snapshots": ["clean", "pristine"] }),
        ))
    })
}

/// Forced power off, then boot (creating the machine if it is missing), then
/// re-provision.
fn restart<C: VmController>(ctx: &CommandContext<C>) -> Result<bool, OrchestratorError> {
    let orch = &ctx.orchestrator;
    orch.power_off()?;
    orch.ensure_running()?;
    orch.controller().provision(orch.machine(), None)?;
    orch.require_ready(&orch.settings().short_readiness)
}

/// Power off, boot and re-provision. A missing machine is created by the boot
/// step. Snapshots are kept.
pub fn vm_restart<C: VmController>(ctx: &CommandContext<C>) -> CommandResult {
    ctx.run("vm-restart", Access::WRITE_MACHINE, |_| {
        let ready = restart(ctx)?;
        Ok(CommandOutput::success(
            format!("Machine '{}' restarted and re-provisioned", ctx.orchestrator.machine()),
            json!({ "ready": ready }),
        ))
    })
}

/// Reset to the clean snapshot, offering a restart when that fails.
pub fn vm_reset<C: VmController>(ctx: &CommandContext<C>) -> CommandResult {
    ctx.run("vm-reset", Access::WRITE_MACHINE, |session| {
        let orch = &ctx.orchestrator;
        let err = match orch.run_cleanup(
            CleanupLevel::VmSnapshotReset,
            &ctx.host,
            ctx.confirm.as_ref(),
            ctx.force,
        ) {
            Ok(report) => {
                return Ok(CommandOutput::success(
                    format!("Machine '{}' reset to '{CLEAN_SNAPSHOT}'", orch.machine()),
                    json!(report),
                ));
            }
            Err(e) => e,
        };

        warn!(machine = %orch.machine(), error = %err, "Snapshot reset failed");
        let accepted = ctx.force
            || ctx.confirm.confirm(&format!(
                "Reset failed ({err}). Fall back to vm-restart (power off, boot, re-provision)?"
            ))?;
        if !accepted {
            return Err(err);
        }

        let detail = format!("snapshot reset failed: {err}; fell back to vm-restart");
        record(session, "vm-snapshot-reset", err.outcome());
        let ready = restart(ctx)?;
        record(session, "vm-restart", OperationOutcome::Success);
        Ok(CommandOutput::success(
            format!("Machine '{}' restarted (no snapshot restored)", orch.machine()),
            json!({ "ready": ready, "fallback": "vm-restart" }),
        )
        .with_outcome(OperationOutcome::partial(detail)))
    })
}

pub fn vm_rebuild<C: VmController>(ctx: &CommandContext<C>) -> CommandResult {
    ctx.run("vm-rebuild", Access::WRITE_MACHINE, |_| {
        let report = ctx.orchestrator.run_cleanup(
            CleanupLevel::VmRebuild,
            &ctx.host,
            ctx.confirm.as_ref(),
            ctx.force,
        )?;
        Ok(CommandOutput::success(
            format!("Machine '{}' rebuilt", ctx.orchestrator.machine()),
            json!(report),
        ))
    })
}

/// Baseline names are captured from a stopped machine; any other name is
/// taken in the current state.
pub fn vm_snapshot<C: VmController>(ctx: &CommandContext<C>, name: &str) -> CommandResult {
    ctx.run("vm-snapshot", Access::WRITE_MACHINE, |_| {
        let orch = &ctx.orchestrator;
        let tier = SnapshotTier::from_name(name);
        if tier.is_baseline() {
            orch.create_baseline(&tier)?;
        } else {
            orch.create_snapshot(name, &format!("Snapshot '{name}'"))?;
        }
        Ok(CommandOutput::success(
            format!("Snapshot '{name}' created"),
            json!({ "snapshot": name, "tier": tier }),
        ))
    })
}

fn restore_and_start<C: VmController>(
    ctx: &CommandContext<C>,
    name: &str,
) -> Result<bool, OrchestratorError> {
    let orch = &ctx.orchestrator;
    orch.restore_snapshot(name)?;
    orch.ensure_running()?;
    orch.require_ready(&orch.settings().short_readiness)
}

pub fn vm_restore<C: VmController>(ctx: &CommandContext<C>, name: &str) -> CommandResult {
    ctx.run("vm-restore", Access::WRITE_MACHINE, |_| {
        let ready = restore_and_start(ctx, name)?;
        Ok(CommandOutput::success(
            format!("Restored '{name}'; machine is running"),
            json!({ "snapshot": name, "ready": ready }),
        ))
    })
}

pub fn vm_list<C: VmController>(ctx: &CommandContext<C>) -> CommandResult {
    ctx.run("vm-list", Access::READ_MACHINE, |_| {
        let snapshots = ctx.orchestrator.list_snapshots()?;
        let message = if snapshots.is_empty() {
            "No snapshots".to_string()
        } else {
            snapshots
                .iter()
                .map(|s| {
                    let marker = if s.tier().is_baseline() { "*" } else { " " };
                    format!("{marker} {:<20} {}", s.name, s.description)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        Ok(CommandOutput::success(message, json!({ "snapshots": snapshots })))
    })
}

pub fn vm_pristine<C: VmController>(ctx: &CommandContext<C>) -> CommandResult {
    ctx.run("vm-pristine", Access::WRITE_MACHINE, |_| {
        ctx.orchestrator.create_baseline(&SnapshotTier::Pristine)?;
        Ok(CommandOutput::success(
            "Pristine snapshot created",
            json!({ "snapshot": SnapshotTier::Pristine }),
        ))
    })
}

pub fn vm_clone<C: VmController>(ctx: &CommandContext<C>) -> CommandResult {
    ctx.run("vm-clone", Access::WRITE_MACHINE, |_| {
        let ready = restore_and_start(ctx, SnapshotTier::Pristine.name())?;
        Ok(CommandOutput::success(
            "Restored 'pristine'; machine is running",
            json!({ "snapshot": SnapshotTier::Pristine, "ready": ready }),
        ))
    })
}

/// Restore the best available baseline and sync the test payload.
pub fn vm_ready<C: VmController>(ctx: &CommandContext<C>) -> CommandResult {
    ctx.run("vm-ready", Access::WRITE_MACHINE, |session| {
        let report = ctx.orchestrator.prepare_ready()?;
        for (step, outcome) in report.steps() {
            record(session, &step, outcome);
        }
        Ok(ready_output(&report))
    })
}

fn ready_output(report: &crate::restore::ReadyReport) -> CommandOutput {
    let mut data = json!(report);
    data["baseline_used"] = json!(report.baseline_used());
    let output = CommandOutput::success(
        format!("Machine ready from '{}'", report.tier_label()),
        data,
    );
    if report.fallbacks.is_empty() && report.warnings.is_empty() {
        output
    } else {
        let detail = report
            .fallbacks
            .iter()
            .chain(&report.warnings)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        output.with_outcome(OperationOutcome::partial(detail))
    }
}

/// Make the machine ready, then hand it to the configured test command.
pub fn run_tests<C: VmController>(ctx: &CommandContext<C>, extra_args: &[String]) -> CommandResult {
    ctx.run("run-tests", Access::WRITE_MACHINE, |session| {
        let Some((program, args)) = ctx.tests_command.split_first() else {
            return Err(OrchestratorError::Precondition {
                operation: "run-tests".to_string(),
                message: "no test command configured".to_string(),
                remediation: "set `tests.command` in testvm.toml".to_string(),
            });
        };

        let report = ctx.orchestrator.prepare_ready()?;
        for (step, outcome) in report.steps() {
            record(session, &step, outcome);
        }

        info!(program, "Handing machine to test command");
        let status = Command::new(program)
            .args(args)
            .args(extra_args)
            .env("TESTVM_MACHINE", ctx.orchestrator.machine().as_str())
            .status()
            .map_err(|e| OrchestratorError::host(format!("failed to run `{program}`"), e))?;
        let code = status.code().unwrap_or(1);

        let mut output = ready_output(&report);
        if status.success() {
            record(session, "tests", OperationOutcome::Success);
            output.message = format!("Tests passed ({})", output.message);
        } else {
            let outcome = OperationOutcome::hard(
                format!("test command exited with status {code}"),
                "inspect the test output above",
            );
            record(session, "tests", outcome.clone());
            output.message = format!("Tests failed with status {code}");
            output.outcome = outcome;
        }
        output.exit_code = Some(code);
        Ok(output)
    })
}
