//! Operator confirmation, kept apart from the destructive logic it gates.

use console::{Term, style};
use dialoguer::{Input, Select};
use testvm_common::{CleanupLevel, OrchestratorError};
use tracing::warn;

/// The literal answer that authorises an irreversible operation.
pub const AFFIRMATIVE: &str = "yes";

pub trait Confirm {
    /// Ask the operator to authorise something. `Ok(false)` means declined.
    fn confirm(&self, prompt: &str) -> Result<bool, OrchestratorError>;

    /// Let the operator pick a cleanup level; `None` when they back out.
    fn choose_level(&self, levels: &[CleanupLevel])
    -> Result<Option<CleanupLevel>, OrchestratorError>;
}

/// Interactive prompts on the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalConfirm;

fn prompt_error(e: dialoguer::Error) -> OrchestratorError {
    OrchestratorError::host("failed to read operator input", std::io::Error::other(e.to_string()))
}

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> Result<bool, OrchestratorError> {
        if !Term::stderr().is_term() {
            warn!("No terminal to confirm on; treating as declined (use --force)");
            return Ok(false);
        }
        eprintln!("{} {prompt}", style("WARNING:").red().bold());
        let answer: String = Input::new()
            .with_prompt(format!("Type '{AFFIRMATIVE}' to continue"))
            .allow_empty(true)
            .interact_text()
            .map_err(prompt_error)?;
        Ok(answer.trim() == AFFIRMATIVE)
    }

    fn choose_level(
        &self,
        levels: &[CleanupLevel],
    ) -> Result<Option<CleanupLevel>, OrchestratorError> {
        if !Term::stderr().is_term() {
            warn!("No terminal for the cleanup menu; pass a level or use a cleanup-* command");
            return Ok(None);
        }
        let labels: Vec<String> = levels
            .iter()
            .enumerate()
            .map(|(i, level)| format!("{}. {:<18} {}", i + 1, level.as_str(), level.summary()))
            .collect();
        let choice = Select::new()
            .with_prompt("Select cleanup level (Esc to cancel)")
            .items(&labels)
            .default(0)
            .interact_opt()
            .map_err(prompt_error)?;
        Ok(choice.and_then(|i| levels.get(i).copied()))
    }
}
