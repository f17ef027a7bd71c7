//! Advisory per-machine lock so two invocations never drive the same VM.
//!
//! A PID file under `<data_dir>/locks/<machine>.lock`. A lock whose PID is no
//! longer running is treated as stale and taken over.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use testvm_common::{MachineName, OrchestratorError};
use tracing::{debug, warn};

/// Held for the duration of a mutating command; released on drop.
#[derive(Debug)]
pub struct MachineLock {
    path: PathBuf,
}

impl MachineLock {
    pub fn acquire(locks_dir: &Path, machine: &MachineName) -> Result<Self, OrchestratorError> {
        fs::create_dir_all(locks_dir)
            .map_err(|e| OrchestratorError::host("failed to create lock directory", e))?;
        let path = lock_path(locks_dir, machine);

        if path.exists() {
            if let Some(pid) = read_pid(&path) {
                if is_process_running(pid) {
                    return Err(OrchestratorError::LockHeld {
                        machine: machine.to_string(),
                        pid,
                        path,
                    });
                }
                warn!(pid, path = %path.display(), "Removing stale machine lock");
            }
            let _ = fs::remove_file(&path);
        }

        let mut file = File::options()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    // Lost a race with another invocation between check and create.
                    match read_pid(&path) {
                        Some(pid) => OrchestratorError::LockHeld {
                            machine: machine.to_string(),
                            pid,
                            path: path.clone(),
                        },
                        None => OrchestratorError::host("failed to create lock file", e),
                    }
                } else {
                    OrchestratorError::host("failed to create lock file", e)
                }
            })?;
        write!(file, "{}", std::process::id())
            .map_err(|e| OrchestratorError::host("failed to write lock file", e))?;

        debug!(machine = %machine, path = %path.display(), "Machine lock acquired");
        Ok(Self { path })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID of the live holder, if any.
    pub fn holder(locks_dir: &Path, machine: &MachineName) -> Option<u32> {
        read_pid(&lock_path(locks_dir, machine)).filter(|pid| is_process_running(*pid))
    }
}

impl Drop for MachineLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_path(locks_dir: &Path, machine: &MachineName) -> PathBuf {
    let safe = machine.as_str().replace(['/', '\\'], "_");
    locks_dir.join(format!("{safe}.lock"))
}

fn read_pid(path: &Path) -> Option<u32> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn is_process_running(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{pid}")).exists()
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ps")
            .args(["-p", &pid.to_string()])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = pid;
        false
    }
}
