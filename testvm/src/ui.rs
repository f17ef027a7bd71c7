//! Terminal and JSON rendering of command results.

use crate::commands::CommandOutput;
use crate::commands::helpers::indent_lines;
use console::style;
use serde::Serialize;
use serde_json::Value;
use testvm_common::{OperationOutcome, OrchestratorError};

/// Status glyphs used in text output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusIndicator {
    Success,
    Warning,
    Error,
    Info,
}

impl StatusIndicator {
    pub fn display(self) -> String {
        match self {
            Self::Success => style("✓").green().bold().to_string(),
            Self::Warning => style("!").yellow().bold().to_string(),
            Self::Error => style("✗").red().bold().to_string(),
            Self::Info => style("•").cyan().to_string(),
        }
    }

    fn for_outcome(outcome: &OperationOutcome) -> Self {
        match outcome {
            OperationOutcome::Success => Self::Success,
            OperationOutcome::PartialFailureWithFallback { .. } => Self::Warning,
            OperationOutcome::HardFailure { .. } => Self::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub remediation: String,
}

impl ApiError {
    pub fn from_error(err: &OrchestratorError) -> Self {
        Self {
            code: err.code().code_string(),
            message: err.to_string(),
            remediation: err.remediation(),
        }
    }
}

/// Envelope printed by `--json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub command: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OperationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiResponse {
    pub fn ok(command: &str, output: &CommandOutput) -> Self {
        Self {
            command: command.to_string(),
            success: output.outcome.is_success(),
            data: output.data.clone(),
            outcome: Some(output.outcome.clone()),
            error: None,
        }
    }

    pub fn err(command: &str, err: &OrchestratorError) -> Self {
        Self {
            command: command.to_string(),
            success: err.is_declined(),
            data: Value::Null,
            outcome: None,
            error: Some(ApiError::from_error(err)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputContext {
    json: bool,
}

impl OutputContext {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn json<T: Serialize>(&self, value: &T) -> serde_json::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Print a command result and return the process exit status.
    pub fn render(
        &self,
        command: &str,
        result: &Result<CommandOutput, OrchestratorError>,
    ) -> i32 {
        if self.json {
            let response = match result {
                Ok(output) => ApiResponse::ok(command, output),
                Err(err) => ApiResponse::err(command, err),
            };
            if let Err(e) = self.json(&response) {
                eprintln!("failed to encode JSON output: {e}");
            }
        } else {
            match result {
                Ok(output) => print_output(output),
                Err(err) => print_error(err),
            }
        }
        exit_code(result)
    }
}

/// Declining is a clean exit; any other error exits 1.
pub fn exit_code(result: &Result<CommandOutput, OrchestratorError>) -> i32 {
    match result {
        Ok(output) => output.exit_code(),
        Err(err) if err.is_declined() => 0,
        Err(_) => 1,
    }
}

fn print_output(output: &CommandOutput) {
    let indicator = StatusIndicator::for_outcome(&output.outcome);
    let mut lines = output.message.lines();
    if let Some(first) = lines.next() {
        println!("{} {first}", indicator.display());
    }
    let rest: Vec<_> = lines.collect();
    if !rest.is_empty() {
        println!("{}", indent_lines(&rest.join("\n"), "  "));
    }
    match &output.outcome {
        OperationOutcome::PartialFailureWithFallback { detail } => {
            println!("  {} {}", style("fallback:").yellow(), detail);
        }
        OperationOutcome::HardFailure {
            reason,
            remediation,
        } => {
            eprintln!("  {} {reason}", style("error:").red());
            eprintln!("  {} {remediation}", style("fix:").cyan());
        }
        OperationOutcome::Success => {}
    }
}

fn print_error(err: &OrchestratorError) {
    if err.is_declined() {
        println!("{} {err}; nothing was changed", StatusIndicator::Info.display());
        return;
    }
    eprintln!(
        "{} {} {}",
        StatusIndicator::Error.display(),
        style(err.code().code_string()).dim(),
        err
    );
    let remediation = err.remediation();
    if !remediation.is_empty() {
        eprintln!("  {} {remediation}", style("fix:").cyan());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declined_exits_zero() {
        let result = Err(OrchestratorError::ConfirmationDeclined {
            operation: "nuclear-reset".into(),
        });
        assert_eq!(exit_code(&result), 0);
        let response = ApiResponse::err("cleanup-all", result.as_ref().unwrap_err());
        assert!(response.success);
    }

    #[test]
    fn test_errors_exit_one_with_code_and_remediation() {
        let err = OrchestratorError::machine_not_found("testvm");
        let response = ApiResponse::err("vm-list", &err);
        assert!(!response.success);
        let api_err = response.error.unwrap();
        assert!(api_err.code.starts_with("TVM-E1"));
        assert!(api_err.remediation.contains("vm-init"));
        assert_eq!(exit_code(&Err(err)), 1);
    }

    #[test]
    fn test_ok_envelope_shape() {
        let output = CommandOutput::success("done", serde_json::json!({"state": "running"}));
        let value = serde_json::to_value(ApiResponse::ok("vm-status", &output)).unwrap();
        assert_eq!(value["command"], "vm-status");
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["state"], "running");
        assert_eq!(value["outcome"]["status"], "success");
        assert!(value.get("error").is_none());
    }
}
