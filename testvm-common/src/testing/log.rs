//! JSONL test logging for post-mortem debugging of orchestrator tests.
//!
//! Each logged test gets `target/test-logs/<test>.jsonl`; all tracing output
//! from tests is additionally collected in `target/test-logs/all_tests.jsonl`.
//! Logging is off locally and on in CI unless `TESTVM_TEST_LOGGING` says
//! otherwise.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Instant;
use tracing_subscriber::prelude::*;

/// Phase of a test a log line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    Setup,
    Execute,
    Verify,
    Teardown,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Setup => "setup",
            Self::Execute => "execute",
            Self::Verify => "verify",
            Self::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

static GLOBAL_LOGGING_INIT: Once = Once::new();

/// Route tracing output from every test into one JSONL file plus the test
/// writer. Idempotent.
///
/// `TESTVM_TEST_LOG_LEVEL` sets the filter (default `info`).
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let file_layer = open_log_file("all_tests").ok().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_current_span(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .compact();

        let level = std::env::var("TESTVM_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "testvm={level},testvm_common={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer)
            .try_init();
    });
}

fn test_log_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir).join("test-logs");
    }
    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target.join("test-logs");
        }
        if !cwd.pop() {
            return PathBuf::from("target/test-logs");
        }
    }
}

fn open_log_file(name: &str) -> std::io::Result<std::fs::File> {
    let dir = test_log_dir();
    std::fs::create_dir_all(&dir)?;
    let safe_name = name.replace("::", "_").replace(['/', '\\'], "_");
    std::fs::File::create(dir.join(format!("{safe_name}.jsonl")))
}

/// One line of a per-test log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogEntry {
    pub timestamp: String,
    pub test_name: String,
    pub phase: TestPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub elapsed_ms: u64,
}

/// Per-test JSONL logger.
pub struct TestLogger {
    test_name: String,
    started: Instant,
    entries: Mutex<Vec<TestLogEntry>>,
    file: Option<Mutex<std::fs::File>>,
}

impl TestLogger {
    pub fn for_test(test_name: &str) -> Self {
        let logger = Self {
            test_name: test_name.to_string(),
            started: Instant::now(),
            entries: Mutex::new(Vec::new()),
            file: open_log_file(test_name).ok().map(Mutex::new),
        };
        logger.log(TestPhase::Setup, "TEST START");
        logger
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        self.record(phase, message.into(), None);
    }

    pub fn log_with_data(
        &self,
        phase: TestPhase,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        self.record(phase, message.into(), Some(data));
    }

    fn record(&self, phase: TestPhase, message: String, data: Option<serde_json::Value>) {
        let entry = TestLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            test_name: self.test_name.clone(),
            phase,
            message,
            data,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };

        if let Some(file) = &self.file
            && let Ok(mut f) = file.lock()
            && let Ok(json) = serde_json::to_string(&entry)
        {
            let _ = writeln!(f, "{json}");
        }

        tracing::info!(
            test = %self.test_name,
            phase = %entry.phase,
            elapsed_ms = entry.elapsed_ms,
            "{}",
            entry.message
        );

        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    pub fn entries(&self) -> Vec<TestLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn pass(self) {
        self.log(TestPhase::Verify, "TEST PASS");
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.log_with_data(
            TestPhase::Verify,
            "TEST FAIL",
            serde_json::json!({ "reason": reason.into() }),
        );
    }
}

/// Logs TEST START on creation and TEST PASS/FAIL on drop.
///
/// Enabled by `TESTVM_TEST_LOGGING=1`, or by `CI` being set unless
/// `TESTVM_TEST_LOGGING=0`. When disabled every method is a no-op.
pub struct TestGuard {
    inner: Option<TestLogger>,
}

impl TestGuard {
    pub fn new(test_name: &str) -> Self {
        let inner = Self::is_enabled().then(|| {
            init_global_test_logging();
            TestLogger::for_test(test_name)
        });
        Self { inner }
    }

    fn is_enabled() -> bool {
        match std::env::var("TESTVM_TEST_LOGGING").as_deref() {
            Ok("1" | "true") => true,
            Ok("0" | "false") => false,
            _ => std::env::var("CI").is_ok(),
        }
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        if let Some(logger) = &self.inner {
            logger.log(phase, message);
        }
    }

    pub fn log_with_data(
        &self,
        phase: TestPhase,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        if let Some(logger) = &self.inner {
            logger.log_with_data(phase, message, data);
        }
    }
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        if let Some(logger) = self.inner.take() {
            if std::thread::panicking() {
                logger.fail("test panicked");
            } else {
                logger.pass();
            }
        }
    }
}

/// A [`TestGuard`] named after the enclosing test function.
#[macro_export]
macro_rules! test_guard {
    () => {{
        fn _f() {}
        fn _type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = _type_name_of(_f);
        let name = name.strip_suffix("::_f").unwrap_or(name);
        let name = name.rsplit("::").next().unwrap_or(name);
        $crate::testing::TestGuard::new(name)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_records_start_and_messages() {
        let logger = TestLogger::for_test("test_logger_records_start_and_messages");
        logger.log(TestPhase::Execute, "restoring clean");
        logger.log_with_data(
            TestPhase::Verify,
            "tier chosen",
            serde_json::json!({ "tier": "clean" }),
        );
        let entries = logger.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "TEST START");
        assert_eq!(entries[2].data, Some(serde_json::json!({ "tier": "clean" })));
    }

    #[test]
    fn test_entry_serializes_phase_in_snake_case() {
        let entry = TestLogEntry {
            timestamp: "2026-01-01T00:00:00Z".into(),
            test_name: "t".into(),
            phase: TestPhase::Teardown,
            message: "done".into(),
            data: None,
            elapsed_ms: 7,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"phase\":\"teardown\""));
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn test_disabled_guard_is_noop() {
        let guard = TestGuard { inner: None };
        guard.log(TestPhase::Execute, "ignored");
    }

    #[test]
    fn test_macro_names_guard_after_function() {
        let _guard = crate::test_guard!();
    }
}
