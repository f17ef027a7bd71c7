//! `vm-history`: recent sessions from the session log.

use super::helpers::humanize_duration;
use super::{Access, CommandContext, CommandOutput};
use serde_json::json;
use testvm_common::session::SessionSummary;
use testvm_common::{OrchestratorError, VmController, read_history};

pub fn vm_history<C: VmController>(
    ctx: &CommandContext<C>,
    limit: usize,
) -> Result<CommandOutput, OrchestratorError> {
    ctx.run("vm-history", Access::READ_HOST, |session| {
        let dir = ctx.sessions.dir();
        let history: Vec<SessionSummary> = read_history(dir, limit.saturating_add(1))
            .map_err(|e| {
                OrchestratorError::host(
                    format!("failed to read session history in {}", dir.display()),
                    std::io::Error::other(e.to_string()),
                )
            })?
            .into_iter()
            .filter(|s| s.session_id != session.id())
            .take(limit)
            .collect();

        let message = if history.is_empty() {
            "No sessions recorded yet".to_string()
        } else {
            history.iter().map(format_line).collect::<Vec<_>>().join("\n")
        };
        Ok(CommandOutput::success(message, json!({ "sessions": history })))
    })
}

fn format_line(summary: &SessionSummary) -> String {
    let duration = summary
        .finished
        .map(|end| humanize_duration((end - summary.started).num_seconds().max(0) as u64))
        .unwrap_or_else(|| "-".to_string());
    let state = summary
        .machine_state
        .map_or_else(|| "-".to_string(), |s| s.to_string());
    let outcome = summary
        .outcome
        .as_ref()
        .map_or_else(|| "interrupted".to_string(), |o| o.to_string());
    format!(
        "{}  {:<18} {:>8}  {:<10} {}",
        summary.started.format("%Y-%m-%d %H:%M:%S"),
        summary.operation,
        duration,
        state,
        outcome
    )
}
