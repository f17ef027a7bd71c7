//! Error catalog for testvm.
//!
//! Each error code has a stable identifier (TVM-E001 through TVM-E499), a
//! message and remediation steps that name the exact command to run.
//!
//! | Range      | Category   | Description                               |
//! |------------|------------|-------------------------------------------|
//! | E001-E099  | Config     | Configuration and environment errors      |
//! | E100-E199  | Machine    | Machine lifecycle and controller failures |
//! | E200-E299  | Snapshot   | Snapshot registry and baseline errors     |
//! | E300-E399  | Operation  | Readiness, confirmation and cleanup       |
//! | E400-E499  | Internal   | Host filesystem, lock and session errors  |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all testvm error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML
    ConfigParseError,
    /// Configuration contains invalid values
    ConfigValidationError,
    /// Environment variable has invalid value
    ConfigEnvError,

    // =========================================================================
    // Machine Errors (E100-E199)
    // =========================================================================
    /// Machine does not exist
    MachineNotFound,
    /// VM controller call failed
    ControllerFailed,
    /// VM controller call timed out
    ControllerTimeout,
    /// VM controller tooling is not installed
    ControllerUnavailable,

    // =========================================================================
    // Snapshot Errors (E200-E299)
    // =========================================================================
    /// Named snapshot does not exist
    SnapshotNotFound,
    /// Clean baseline required but missing
    CleanSnapshotMissing,

    // =========================================================================
    // Operation Errors (E300-E399)
    // =========================================================================
    /// Guest never became interactively usable
    ReadinessTimeout,
    /// Operator declined a destructive confirmation
    ConfirmationDeclined,
    /// Operation precondition not met
    PreconditionFailed,

    // =========================================================================
    // Internal Errors (E400-E499)
    // =========================================================================
    /// Another invocation holds the machine lock
    LockHeld,
    /// Host filesystem operation failed
    HostIoError,
    /// Session log could not be written
    SessionLogError,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigReadError => 1,
            Self::ConfigParseError => 2,
            Self::ConfigValidationError => 3,
            Self::ConfigEnvError => 4,

            Self::MachineNotFound => 100,
            Self::ControllerFailed => 101,
            Self::ControllerTimeout => 102,
            Self::ControllerUnavailable => 103,

            Self::SnapshotNotFound => 200,
            Self::CleanSnapshotMissing => 201,

            Self::ReadinessTimeout => 300,
            Self::ConfirmationDeclined => 301,
            Self::PreconditionFailed => 302,

            Self::LockHeld => 400,
            Self::HostIoError => 401,
            Self::SessionLogError => 402,
        }
    }

    /// Returns the formatted error code string (e.g., "TVM-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("TVM-E{:03}", self.code_number())
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Machine,
            200..=299 => ErrorCategory::Snapshot,
            300..=399 => ErrorCategory::Operation,
            _ => ErrorCategory::Internal,
        }
    }

    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigReadError => "Failed to read configuration file",
            Self::ConfigParseError => "Configuration file contains invalid TOML",
            Self::ConfigValidationError => "Configuration contains invalid values",
            Self::ConfigEnvError => "Environment variable has invalid value",
            Self::MachineNotFound => "The test machine does not exist",
            Self::ControllerFailed => "A VM controller call failed",
            Self::ControllerTimeout => "A VM controller call timed out",
            Self::ControllerUnavailable => "The VM controller tooling is not available",
            Self::SnapshotNotFound => "The requested snapshot does not exist",
            Self::CleanSnapshotMissing => "No clean baseline snapshot exists",
            Self::ReadinessTimeout => "The guest desktop never became ready",
            Self::ConfirmationDeclined => "Destructive operation declined",
            Self::PreconditionFailed => "Operation precondition not met",
            Self::LockHeld => "Another testvm invocation is using this machine",
            Self::HostIoError => "Host filesystem operation failed",
            Self::SessionLogError => "Session log could not be written",
        }
    }

    /// Returns remediation steps for this error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigReadError => &["Check the path passed to --config and its permissions"],
            Self::ConfigParseError => &["Fix the TOML syntax reported in the error message"],
            Self::ConfigValidationError => &["Correct the reported configuration values"],
            Self::ConfigEnvError => &["Unset or correct the reported TESTVM_* variable"],
            Self::MachineNotFound => &[
                "Run `testvm vm-init` to create and baseline the machine",
                "Or run `testvm vm-start` to create it without snapshots",
            ],
            Self::ControllerFailed => &[
                "Inspect the controller diagnostic above",
                "Run `testvm vm-restart` to recover an interrupted setup",
            ],
            Self::ControllerTimeout => &[
                "Raise timeouts.command_secs if the host is slow",
                "Check VirtualBox for a hung machine and run `testvm vm-restart`",
            ],
            Self::ControllerUnavailable => &["Install Vagrant and VirtualBox and make sure both are on PATH"],
            Self::SnapshotNotFound => &["Run `testvm vm-list` to see available snapshots"],
            Self::CleanSnapshotMissing => &["Run `testvm vm-init` to create a clean baseline"],
            Self::ReadinessTimeout => &[
                "Check the guest console; the desktop session may have crashed",
                "Run `testvm vm-reset` or `testvm vm-restart`",
            ],
            Self::ConfirmationDeclined => &["Re-run with --force to skip confirmation"],
            Self::PreconditionFailed => &["Follow the hint in the error message"],
            Self::LockHeld => &[
                "Wait for the other invocation to finish",
                "Remove the lock file if the holder process no longer exists",
            ],
            Self::HostIoError => &["Check permissions and free space in the data directory"],
            Self::SessionLogError => &["Check permissions of <data_dir>/logs"],
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigReadError,
            Self::ConfigParseError,
            Self::ConfigValidationError,
            Self::ConfigEnvError,
            Self::MachineNotFound,
            Self::ControllerFailed,
            Self::ControllerTimeout,
            Self::ControllerUnavailable,
            Self::SnapshotNotFound,
            Self::CleanSnapshotMissing,
            Self::ReadinessTimeout,
            Self::ConfirmationDeclined,
            Self::PreconditionFailed,
            Self::LockHeld,
            Self::HostIoError,
            Self::SessionLogError,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Config,
    Machine,
    Snapshot,
    Operation,
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Machine => "Machine",
            Self::Snapshot => "Snapshot",
            Self::Operation => "Operation",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);
        if !self.remediation.is_empty() {
            output.push_str("Remediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }
        output
    }

    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}
