//! Session/result logging.
//!
//! Every top-level command opens exactly one session, appends the outcome of
//! notable steps and closes it with the final outcome. Entries go to
//! `<sessions_dir>/session-<timestamp>-<pid>.jsonl` and each one is flushed
//! and synced before `append` returns, so an interrupted run still leaves a
//! partial record. The file is reopened per entry, so a directory removed
//! mid-session is recreated on the next write.

use crate::types::{MachineState, OperationOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session for another operation is already open; refusing to open '{operation}'")]
    AlreadyOpen { operation: String },

    #[error("failed to write session log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode session entry: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Open,
    Step,
    Close,
}

/// One append-only line of a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    pub operation: String,
    pub kind: EntryKind,
    /// Step label for `Step` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Machine state observed, when the command looked at the machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_state: Option<MachineState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OperationOutcome>,
}

/// Process-wide session factory. Only one session may be open at a time.
#[derive(Debug, Clone)]
pub struct SessionLog {
    dir: PathBuf,
    open: Arc<AtomicBool>,
}

impl SessionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open a session for a top-level operation.
    pub fn open(&self, operation: &str) -> Result<SessionHandle, SessionError> {
        if self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::AlreadyOpen {
                operation: operation.to_string(),
            });
        }

        let now = Utc::now();
        let path = self.dir.join(format!(
            "session-{}-{}.jsonl",
            now.format("%Y%m%dT%H%M%S%3f"),
            std::process::id()
        ));
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            operation: operation.to_string(),
            path,
            entries: Mutex::new(Vec::new()),
            open_flag: Arc::clone(&self.open),
            closed: false,
        };

        if let Err(e) = handle.write(EntryKind::Open, None, None, None) {
            self.open.store(false, Ordering::Release);
            return Err(e);
        }
        debug!(operation, session = %handle.id, path = %handle.path.display(), "Session opened");
        Ok(handle)
    }
}

/// An open session. Closing consumes it; dropping it unclosed records the
/// session as interrupted.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    operation: String,
    path: PathBuf,
    entries: Mutex<Vec<SessionLogEntry>>,
    open_flag: Arc<AtomicBool>,
    closed: bool,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the outcome of a step within the operation.
    pub fn append(&self, step: &str, outcome: OperationOutcome) -> Result<(), SessionError> {
        self.write(EntryKind::Step, Some(step), None, Some(outcome))
    }

    /// Record the final outcome and the machine state observed at the end.
    pub fn close(
        mut self,
        machine_state: Option<MachineState>,
        outcome: OperationOutcome,
    ) -> Result<(), SessionError> {
        self.closed = true;
        self.open_flag.store(false, Ordering::Release);
        self.write(EntryKind::Close, None, machine_state, Some(outcome))
    }

    /// Entries written so far, in order.
    pub fn entries(&self) -> Vec<SessionLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write(
        &self,
        kind: EntryKind,
        step: Option<&str>,
        machine_state: Option<MachineState>,
        outcome: Option<OperationOutcome>,
    ) -> Result<(), SessionError> {
        let entry = SessionLogEntry {
            timestamp: Utc::now(),
            session_id: self.id,
            operation: self.operation.clone(),
            kind,
            step: step.map(str::to_string),
            machine_state,
            outcome,
        };
        let line = serde_json::to_string(&entry)?;

        let io_err = |source| SessionError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        writeln!(file, "{line}").map_err(io_err)?;
        file.sync_data().map_err(io_err)?;

        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let outcome = OperationOutcome::hard(
            "session ended without a final outcome",
            "check the terminal output of the interrupted command",
        );
        if let Err(e) = self.write(EntryKind::Close, None, None, Some(outcome)) {
            warn!(error = %e, "Failed to record interrupted session");
        }
        self.open_flag.store(false, Ordering::Release);
    }
}

/// A session reconstructed from its log lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub operation: String,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub machine_state: Option<MachineState>,
    pub steps: Vec<(String, OperationOutcome)>,
    /// `None` when the process died before closing the session.
    pub outcome: Option<OperationOutcome>,
}

/// Most recent sessions found in `dir`, newest first.
///
/// Unreadable lines are skipped; a missing directory yields no history.
pub fn read_history(dir: &Path, limit: usize) -> Result<Vec<SessionSummary>, SessionError> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(SessionError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut sessions: HashMap<Uuid, SessionSummary> = HashMap::new();
    for dirent in read_dir.flatten() {
        let path = dirent.path();
        let is_session_file = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("session-") && n.ends_with(".jsonl"));
        if !is_session_file {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for entry in content
            .lines()
            .filter_map(|line| serde_json::from_str::<SessionLogEntry>(line).ok())
        {
            let summary = sessions
                .entry(entry.session_id)
                .or_insert_with(|| SessionSummary {
                    session_id: entry.session_id,
                    operation: entry.operation.clone(),
                    started: entry.timestamp,
                    finished: None,
                    machine_state: None,
                    steps: Vec::new(),
                    outcome: None,
                });
            match entry.kind {
                EntryKind::Open => summary.started = entry.timestamp,
                EntryKind::Step => {
                    if let (Some(step), Some(outcome)) = (entry.step, entry.outcome) {
                        summary.steps.push((step, outcome));
                    }
                }
                EntryKind::Close => {
                    summary.finished = Some(entry.timestamp);
                    summary.machine_state = entry.machine_state;
                    summary.outcome = entry.outcome;
                }
            }
        }
    }

    let mut history: Vec<_> = sessions.into_values().collect();
    history.sort_by(|a, b| b.started.cmp(&a.started));
    history.truncate(limit);
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<SessionLogEntry> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_session_lifecycle_is_written_per_entry() {
        let dir = TempDir::new().unwrap();
        let log = SessionLog::new(dir.path().join("logs"));

        let session = log.open("vm-reset").unwrap();
        let path = session.path().to_path_buf();
        assert_eq!(read_lines(&path).len(), 1);

        session
            .append("restore:clean", OperationOutcome::Success)
            .unwrap();
        assert_eq!(read_lines(&path).len(), 2);

        session
            .close(Some(MachineState::Running), OperationOutcome::Success)
            .unwrap();
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].kind, EntryKind::Open);
        assert_eq!(lines[1].step.as_deref(), Some("restore:clean"));
        assert_eq!(lines[2].machine_state, Some(MachineState::Running));
        assert!(lines.iter().all(|e| e.operation == "vm-reset"));
    }

    #[test]
    fn test_second_open_is_rejected_until_close() {
        let dir = TempDir::new().unwrap();
        let log = SessionLog::new(dir.path());

        let first = log.open("vm-init").unwrap();
        assert!(matches!(
            log.open("vm-status"),
            Err(SessionError::AlreadyOpen { .. })
        ));
        first.close(None, OperationOutcome::Success).unwrap();
        assert!(log.open("vm-status").is_ok());
    }

    #[test]
    fn test_dropped_session_is_closed_as_interrupted() {
        let dir = TempDir::new().unwrap();
        let log = SessionLog::new(dir.path());
        let path = {
            let session = log.open("vm-rebuild").unwrap();
            session.path().to_path_buf()
        };
        let lines = read_lines(&path);
        assert_eq!(lines.last().map(|e| e.kind), Some(EntryKind::Close));
        assert!(matches!(
            lines.last().and_then(|e| e.outcome.clone()),
            Some(OperationOutcome::HardFailure { .. })
        ));
        assert!(log.open("vm-status").is_ok());
    }

    #[test]
    fn test_entry_survives_deleted_log_dir() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let log = SessionLog::new(&logs);
        let session = log.open("cleanup-data").unwrap();
        fs::remove_dir_all(&logs).unwrap();
        session
            .close(None, OperationOutcome::Success)
            .unwrap();
        assert!(logs.is_dir());
    }

    #[test]
    fn test_history_is_newest_first_and_limited() {
        let dir = TempDir::new().unwrap();
        let log = SessionLog::new(dir.path());
        for op in ["vm-start", "vm-reset", "vm-stop"] {
            let session = log.open(op).unwrap();
            session
                .append("probe", OperationOutcome::Success)
                .unwrap();
            session
                .close(Some(MachineState::Stopped), OperationOutcome::Success)
                .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        fs::write(dir.path().join("session-garbage.jsonl"), "not json\n").unwrap();

        let history = read_history(dir.path(), 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].operation, "vm-stop");
        assert_eq!(history[1].operation, "vm-reset");
        assert_eq!(history[0].steps.len(), 1);
        assert_eq!(history[0].outcome, Some(OperationOutcome::Success));
    }

    #[test]
    fn test_history_of_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read_history(&dir.path().join("nope"), 10).unwrap().is_empty());
    }
}
