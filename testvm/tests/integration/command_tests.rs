use serde_json::Value;

use crate::common::{TestEnv, assert_contains, assert_path_exists, init_test_logging};

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_lists_lifecycle_and_cleanup_commands() {
    init_test_logging();
    crate::test_log!("TEST START: test_help_lists_lifecycle_and_cleanup_commands");

    let env = TestEnv::new();
    let output = env.run(&["--help"]);

    assert!(output.status.success(), "testvm --help failed");
    let text = stdout(&output);
    assert_contains(&text, "Snapshot-tiered lifecycle manager");
    for command in ["vm-status", "vm-init", "vm-reset", "cleanup-data", "cleanup-all"] {
        assert_contains(&text, command);
    }
    crate::test_log!("TEST PASS: test_help_lists_lifecycle_and_cleanup_commands");
}

#[test]
fn test_cleanup_data_full_removes_host_artifacts() {
    init_test_logging();
    crate::test_log!("TEST START: test_cleanup_data_full_removes_host_artifacts");

    let env = TestEnv::new();
    let report = env.seed_artifact("results/run-1/report.tap");
    let screenshot = env.seed_artifact("artifacts/login.png");

    let output = env.run(&["cleanup-data", "full", "--force"]);
    assert!(
        output.status.success(),
        "cleanup-data failed: {}",
        stderr(&output)
    );
    assert!(!report.exists());
    assert!(!screenshot.exists());
    assert_path_exists(&env.data_dir().join("results"));
    assert_contains(&stdout(&output), "data-full finished");
    crate::test_log!("TEST PASS: test_cleanup_data_full_removes_host_artifacts");
}

#[test]
fn test_cleanup_data_basic_keeps_fresh_artifacts() {
    init_test_logging();
    let env = TestEnv::new();
    let fresh = env.seed_artifact("reports/today.html");

    let output = env.run(&["cleanup-data"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_path_exists(&fresh);
}

#[test]
fn test_history_json_lists_previous_command() {
    init_test_logging();
    crate::test_log!("TEST START: test_history_json_lists_previous_command");

    let env = TestEnv::new();
    assert!(env.run(&["cleanup-data", "basic"]).status.success());

    let output = env.run(&["vm-history", "--json"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let response: Value = serde_json::from_str(&stdout(&output)).expect("valid JSON envelope");
    assert_eq!(response["command"], "vm-history");
    assert_eq!(response["success"], true);
    let sessions = response["data"]["sessions"].as_array().expect("sessions array");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["operation"], "cleanup-data");
    assert_eq!(sessions[0]["outcome"]["status"], "success");
    crate::test_log!("TEST PASS: test_history_json_lists_previous_command");
}

#[test]
fn test_cleanup_menu_refused_under_force() {
    init_test_logging();
    let env = TestEnv::new();

    let output = env.run(&["cleanup", "--force", "--json"]);
    assert_eq!(output.status.code(), Some(1));
    let response: Value = serde_json::from_str(&stdout(&output)).expect("valid JSON envelope");
    assert_eq!(response["success"], false);
    assert_contains(
        response["error"]["remediation"].as_str().unwrap_or_default(),
        "--level",
    );
}

#[test]
fn test_unknown_cleanup_level_is_usage_error() {
    let env = TestEnv::new();
    let output = env.run(&["cleanup", "--level", "everything"]);
    assert!(!output.status.success());
    assert_contains(&stderr(&output), "unknown cleanup level");
}
