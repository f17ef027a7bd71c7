//! Startup validation of the resolved configuration.

use super::TestvmConfig;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// A configuration problem found during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub severity: Severity,
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{level}: {}: {}", self.field, self.message)
    }
}

/// Check a configuration for values that make the orchestrator misbehave.
pub fn validate_config(config: &TestvmConfig) -> Vec<ConfigWarning> {
    let mut issues = Vec::new();
    let mut push = |severity, field, message: String| {
        issues.push(ConfigWarning {
            severity,
            field,
            message,
        })
    };

    if config.machine.name.trim().is_empty() {
        push(Severity::Error, "machine.name", "must not be empty".into());
    }
    if config.readiness.short_attempts == 0 {
        push(Severity::Error, "readiness.short_attempts", "must be at least 1".into());
    }
    if config.readiness.long_attempts == 0 {
        push(Severity::Error, "readiness.long_attempts", "must be at least 1".into());
    }
    if config.readiness.short_attempts > config.readiness.long_attempts {
        push(
            Severity::Warning,
            "readiness.short_attempts",
            format!(
                "short profile ({}) polls longer than the long profile ({})",
                config.readiness.short_attempts, config.readiness.long_attempts
            ),
        );
    }
    if config.timeouts.command_secs == 0 {
        push(Severity::Error, "timeouts.command_secs", "must be greater than zero".into());
    }
    if config.timeouts.graceful_stop_secs == 0 {
        push(
            Severity::Warning,
            "timeouts.graceful_stop_secs",
            "zero skips graceful shutdown and always powers off".into(),
        );
    }
    if config.readiness.probe_command.trim().is_empty() {
        push(Severity::Error, "readiness.probe_command", "must not be empty".into());
    }
    if let Some(problem) = guest_dir_problem(&config.paths.guest_artifacts_dir) {
        push(Severity::Error, "paths.guest_artifacts_dir", problem.into());
    }

    issues
}

/// Why a guest directory is unsafe to empty with `rm -rf`, if it is.
pub fn guest_dir_problem(dir: &str) -> Option<&'static str> {
    let trimmed = dir.trim().trim_end_matches('/');
    if dir.trim().is_empty() {
        Some("must not be empty")
    } else if !dir.trim().starts_with('/') {
        Some("must be an absolute guest path")
    } else if trimmed.is_empty() {
        Some("must not be the guest root directory")
    } else {
        None
    }
}
