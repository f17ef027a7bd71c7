use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// An isolated data dir, config dir and working dir for one binary run.
pub struct TestEnv {
    root: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let root = TempDir::new().expect("create temp dir");
        for dir in ["data", "config", "work"] {
            fs::create_dir_all(root.path().join(dir)).expect("create fixture dir");
        }
        Self { root }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.path().join("data")
    }

    /// Write a host artifact below the data dir.
    pub fn seed_artifact(&self, rel: &str) -> PathBuf {
        let path = self.data_dir().join(rel);
        fs::create_dir_all(path.parent().expect("artifact has a parent")).expect("create parent");
        fs::write(&path, b"artifact").expect("write artifact");
        path
    }

    pub fn write_config(&self, contents: &str) -> PathBuf {
        let path = self.root.path().join("work").join("testvm.toml");
        fs::write(&path, contents).expect("write config");
        path
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_testvm"));
        cmd.current_dir(self.root.path().join("work"))
            .env("TESTVM_DATA_DIR", self.data_dir())
            .env("TESTVM_MACHINE", "testvm-it")
            .env("XDG_CONFIG_HOME", self.root.path().join("config"))
            .env("HOME", self.root.path())
            .env_remove("RUST_LOG")
            .env_remove("TESTVM_LOG_LEVEL")
            .env_remove("TESTVM_COMMAND_TIMEOUT_SECS")
            .env_remove("TESTVM_POLL_INTERVAL_SECS");
        cmd
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().expect("run testvm")
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }
}
