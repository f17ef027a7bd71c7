use crate::common::{TestEnv, assert_contains, init_test_logging};

#[test]
fn test_invalid_env_override_fails_before_running() {
    init_test_logging();
    let env = TestEnv::new();
    let artifact = env.seed_artifact("logs/old.log");

    let output = env
        .command()
        .env("TESTVM_POLL_INTERVAL_SECS", "0")
        .args(["cleanup-data", "full"])
        .output()
        .expect("run testvm");

    assert!(!output.status.success());
    assert_contains(
        &String::from_utf8_lossy(&output.stderr),
        "TESTVM_POLL_INTERVAL_SECS",
    );
    assert!(artifact.exists(), "nothing should run with a bad config");
}

#[test]
fn test_invalid_config_file_is_reported() {
    init_test_logging();
    let env = TestEnv::new();
    env.write_config("[readiness]\nlong_attempts = 0\n");

    let output = env.run(&["vm-history"]);
    assert!(!output.status.success());
    assert_contains(&String::from_utf8_lossy(&output.stderr), "long_attempts");
}

#[test]
fn test_explicit_config_path_is_used() {
    init_test_logging();
    let env = TestEnv::new();
    let config = env.path().join("custom.toml");
    std::fs::write(&config, "[machine]\nname = \"\"\n").unwrap();

    let output = env
        .command()
        .env_remove("TESTVM_MACHINE")
        .args(["--config", config.to_str().unwrap(), "vm-history"])
        .output()
        .expect("run testvm");
    assert!(!output.status.success());
    assert_contains(&String::from_utf8_lossy(&output.stderr), "machine.name");
}
