//! Bounded execution of controller tooling.
//!
//! Every external call gets its own timeout; a call that overruns is killed
//! and reported as [`ControllerError::Timeout`] instead of hanging the command.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use testvm_common::ControllerError;
use tokio::process::Command;
use tokio::runtime::Runtime;
use tracing::debug;

/// Captured result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// The most useful text to show when the call failed.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs external tools on a private current-thread runtime.
#[derive(Debug)]
pub struct CommandRunner {
    runtime: Runtime,
    timeout: Duration,
    workdir: Option<PathBuf>,
}

impl CommandRunner {
    pub fn new(timeout: Duration, workdir: Option<PathBuf>) -> Result<Self, ControllerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ControllerError::Unavailable(format!("cannot start runtime: {e}")))?;
        Ok(Self {
            runtime,
            timeout,
            workdir,
        })
    }

    /// Run `program args...`. A non-zero exit is not an error here.
    pub fn run(&self, program: &str, args: &[&str]) -> Result<ToolOutput, ControllerError> {
        let operation = describe(program, args);
        debug!(command = %operation, timeout_secs = self.timeout.as_secs(), "Running tool");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let timeout = self.timeout;
        let result = self
            .runtime
            .block_on(async move { tokio::time::timeout(timeout, cmd.output()).await });

        match result {
            Err(_) => Err(ControllerError::Timeout {
                operation,
                after: timeout,
            }),
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => Err(
                ControllerError::Unavailable(format!("{program} is not installed or not on PATH")),
            ),
            Ok(Err(e)) => Err(ControllerError::failed(operation, e.to_string())),
            Ok(Ok(output)) => Ok(ToolOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
        }
    }

    /// Like [`run`](Self::run), but a non-zero exit becomes
    /// [`ControllerError::Failed`] carrying the tool's own output.
    pub fn run_checked(&self, program: &str, args: &[&str]) -> Result<ToolOutput, ControllerError> {
        let output = self.run(program, args)?;
        if output.success {
            Ok(output)
        } else {
            Err(ControllerError::failed(
                describe(program, args),
                output.diagnostic(),
            ))
        }
    }
}

fn describe(program: &str, args: &[&str]) -> String {
    let mut parts = vec![program];
    parts.extend(args.iter().take(3));
    parts.join(" ")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner(timeout: Duration) -> CommandRunner {
        CommandRunner::new(timeout, None).unwrap()
    }

    #[test]
    fn test_successful_command_captures_stdout() {
        let out = runner(Duration::from_secs(10))
            .run_checked("sh", &["-c", "echo ready"])
            .unwrap();
        assert_eq!(out.stdout.trim(), "ready");
    }

    #[test]
    fn test_nonzero_exit_carries_stderr() {
        let err = runner(Duration::from_secs(10))
            .run_checked("sh", &["-c", "echo VERR_X >&2; exit 3"])
            .unwrap_err();
        assert!(matches!(err, ControllerError::Failed { ref diagnostic, .. } if diagnostic == "VERR_X"));
    }

    #[test]
    fn test_overrunning_command_times_out() {
        let err = runner(Duration::from_millis(100))
            .run("sleep", &["5"])
            .unwrap_err();
        assert!(matches!(err, ControllerError::Timeout { .. }));
    }

    #[test]
    fn test_missing_tool_is_unavailable() {
        let err = runner(Duration::from_secs(1))
            .run("testvm-no-such-tool", &[])
            .unwrap_err();
        assert!(matches!(err, ControllerError::Unavailable(_)));
    }

    #[test]
    fn test_diagnostic_falls_back_to_stdout() {
        let out = ToolOutput {
            success: false,
            stdout: " only stdout \n".into(),
            stderr: "  ".into(),
        };
        assert_eq!(out.diagnostic(), "only stdout");
    }
}
