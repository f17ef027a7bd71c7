//! Deterministic in-memory VM controller for tests.
//!
//! Behaves like the real toolchain in the places the orchestrator depends on:
//! `start` on a running machine errors, and `restore_snapshot` on a running
//! machine errors and is recorded as an invariant violation. Every call is
//! recorded so tests can assert on exact call sequences.

use crate::controller::{ControllerError, GuestOutput, VmController};
use crate::types::{MachineName, MachineState, SnapshotInfo};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Controller operations, used for fault injection and call assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    MachineState,
    CreateAndStart,
    Start,
    Stop,
    PowerOff,
    Destroy,
    TakeSnapshot,
    RestoreSnapshot,
    DeleteSnapshot,
    ListSnapshots,
    Provision,
    GuestExec,
    RemoveBaseImage,
}

/// A recorded controller call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub op: MockOp,
    /// Snapshot name, provisioning step or guest command, when relevant.
    pub arg: Option<String>,
    /// Machine state at the moment the call was received.
    pub state_before: MachineState,
}

#[derive(Debug)]
struct MockInner {
    state: MachineState,
    snapshots: Vec<SnapshotInfo>,
    failing: HashSet<MockOp>,
    corrupt_snapshots: HashSet<String>,
    /// Guest polls needed after boot before the desktop is up; `None` = never.
    ready_after_polls: Option<u32>,
    polls_since_boot: u32,
    ignore_graceful_stop: bool,
    base_image_present: bool,
    guest_files: Vec<String>,
    calls: Vec<MockCall>,
    violations: Vec<String>,
}

/// In-memory fake of the VM controller.
#[derive(Debug)]
pub struct MockVmController {
    inner: Mutex<MockInner>,
}

impl Default for MockVmController {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVmController {
    /// A controller with no machine, no snapshots and a guest that is ready
    /// on the first poll after boot.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MockInner {
                state: MachineState::NotFound,
                snapshots: Vec::new(),
                failing: HashSet::new(),
                corrupt_snapshots: HashSet::new(),
                ready_after_polls: Some(1),
                polls_since_boot: 0,
                ignore_graceful_stop: false,
                base_image_present: false,
                guest_files: Vec::new(),
                calls: Vec::new(),
                violations: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_state(self, state: MachineState) -> Self {
        {
            let mut inner = self.lock();
            inner.state = state;
            if state.exists() {
                inner.base_image_present = true;
            }
        }
        self
    }

    pub fn with_snapshot(self, name: &str, description: &str) -> Self {
        self.lock()
            .snapshots
            .push(SnapshotInfo::new(name, description));
        self
    }

    /// Make every call of `op` fail with a controller diagnostic.
    pub fn failing(self, op: MockOp) -> Self {
        self.lock().failing.insert(op);
        self
    }

    /// Make restores of `name` fail as if the snapshot were corrupted.
    pub fn with_corrupt_snapshot(self, name: &str) -> Self {
        self.lock().corrupt_snapshots.insert(name.to_string());
        self
    }

    pub fn ready_after_polls(self, polls: u32) -> Self {
        self.lock().ready_after_polls = Some(polls);
        self
    }

    pub fn never_ready(self) -> Self {
        self.lock().ready_after_polls = None;
        self
    }

    /// Accept graceful stop requests but never actually shut down.
    pub fn ignoring_graceful_stop(self) -> Self {
        self.lock().ignore_graceful_stop = true;
        self
    }

    pub fn with_guest_files(self, files: &[&str]) -> Self {
        self.lock()
            .guest_files
            .extend(files.iter().map(|f| (*f).to_string()));
        self
    }

    pub fn state(&self) -> MachineState {
        self.lock().state
    }

    pub fn snapshot_names(&self) -> Vec<String> {
        self.lock().snapshots.iter().map(|s| s.name.clone()).collect()
    }

    pub fn base_image_present(&self) -> bool {
        self.lock().base_image_present
    }

    pub fn guest_files(&self) -> Vec<String> {
        self.lock().guest_files.clone()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: MockOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Calls of `op` with the given argument (snapshot name, step, command).
    pub fn calls_with_arg(&self, op: MockOp, arg: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op && c.arg.as_deref() == Some(arg))
            .count()
    }

    /// Operations the real toolchain would have rejected as undefined.
    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }

    /// Simulate an operator changing the machine outside the tool.
    pub fn set_state_externally(&self, state: MachineState) {
        self.lock().state = state;
    }
}

fn begin(inner: &mut MockInner, op: MockOp, arg: Option<&str>) -> Result<(), ControllerError> {
    inner.calls.push(MockCall {
        op,
        arg: arg.map(str::to_string),
        state_before: inner.state,
    });
    if inner.failing.contains(&op) {
        return Err(ControllerError::failed(
            format!("{op:?}"),
            "injected controller failure",
        ));
    }
    Ok(())
}

fn require_exists(
    inner: &MockInner,
    operation: &str,
    machine: &MachineName,
) -> Result<(), ControllerError> {
    if inner.state.exists() {
        Ok(())
    } else {
        Err(ControllerError::failed(
            operation,
            format!("machine '{machine}' has not been created"),
        ))
    }
}

fn boot(inner: &mut MockInner) {
    inner.state = MachineState::Running;
    inner.polls_since_boot = 0;
}

impl VmController for MockVmController {
    fn machine_state(&self, _machine: &MachineName) -> Result<MachineState, ControllerError> {
        let inner = self.lock();
        if inner.failing.contains(&MockOp::MachineState) {
            return Err(ControllerError::Unavailable("vagrant: command not found".into()));
        }
        Ok(inner.state)
    }

    fn create_and_start(&self, _machine: &MachineName) -> Result<(), ControllerError> {
        let mut inner = self.lock();
        begin(&mut inner, MockOp::CreateAndStart, None)?;
        if inner.state != MachineState::Running {
            inner.base_image_present = true;
            boot(&mut inner);
        }
        Ok(())
    }

    fn start(&self, machine: &MachineName) -> Result<(), ControllerError> {
        let mut inner = self.lock();
        begin(&mut inner, MockOp::Start, None)?;
        match inner.state {
            MachineState::Running => {
                inner
                    .violations
                    .push(format!("start issued while '{machine}' was running"));
                Err(ControllerError::failed(
                    "start",
                    "VBoxManage: error: The machine is already locked by a session",
                ))
            }
            MachineState::NotFound => require_exists(&inner, "start", machine),
            MachineState::Stopped => {
                boot(&mut inner);
                Ok(())
            }
        }
    }

    fn stop(&self, machine: &MachineName) -> Result<(), ControllerError> {
        let mut inner = self.lock();
        begin(&mut inner, MockOp::Stop, None)?;
        if inner.state != MachineState::Running {
            return Err(ControllerError::failed(
                "stop",
                format!("machine '{machine}' is not running"),
            ));
        }
        if !inner.ignore_graceful_stop {
            inner.state = MachineState::Stopped;
        }
        Ok(())
    }

    fn power_off(&self, machine: &MachineName) -> Result<(), ControllerError> {
        let mut inner = self.lock();
        begin(&mut inner, MockOp::PowerOff, None)?;
        require_exists(&inner, "power_off", machine)?;
        inner.state = MachineState::Stopped;
        Ok(())
    }

    fn destroy(&self, machine: &MachineName) -> Result<(), ControllerError> {
        let mut inner = self.lock();
        begin(&mut inner, MockOp::Destroy, None)?;
        require_exists(&inner, "destroy", machine)?;
        inner.state = MachineState::NotFound;
        inner.snapshots.clear();
        inner.guest_files.clear();
        Ok(())
    }

    fn take_snapshot(
        &self,
        machine: &MachineName,
        name: &str,
        description: &str,
    ) -> Result<(), ControllerError> {
        let mut inner = self.lock();
        begin(&mut inner, MockOp::TakeSnapshot, Some(name))?;
        require_exists(&inner, "take_snapshot", machine)?;
        if inner.snapshots.iter().any(|s| s.name == name) {
            return Err(ControllerError::failed(
                "take_snapshot",
                format!("snapshot '{name}' already exists"),
            ));
        }
        inner.snapshots.push(SnapshotInfo::new(name, description));
        Ok(())
    }

    fn restore_snapshot(&self, machine: &MachineName, name: &str) -> Result<(), ControllerError> {
        let mut inner = self.lock();
        begin(&mut inner, MockOp::RestoreSnapshot, Some(name))?;
        require_exists(&inner, "restore_snapshot", machine)?;
        if inner.state == MachineState::Running {
            inner
                .violations
                .push(format!("restore of '{name}' issued while '{machine}' was running"));
            return Err(ControllerError::failed(
                "restore_snapshot",
                "VBoxManage: error: Cannot restore a snapshot of a running machine",
            ));
        }
        if !inner.snapshots.iter().any(|s| s.name == name) {
            return Err(ControllerError::failed(
                "restore_snapshot",
                format!("Could not find a snapshot named '{name}'"),
            ));
        }
        if inner.corrupt_snapshots.contains(name) {
            return Err(ControllerError::failed(
                "restore_snapshot",
                "VERR_VD_IMAGE_CORRUPTED: differencing image is corrupted",
            ));
        }
        inner.state = MachineState::Stopped;
        inner.guest_files.clear();
        Ok(())
    }

    fn delete_snapshot(&self, _machine: &MachineName, name: &str) -> Result<(), ControllerError> {
        let mut inner = self.lock();
        begin(&mut inner, MockOp::DeleteSnapshot, Some(name))?;
        let before = inner.snapshots.len();
        inner.snapshots.retain(|s| s.name != name);
        if inner.snapshots.len() == before {
            return Err(ControllerError::failed(
                "delete_snapshot",
                format!("Could not find a snapshot named '{name}'"),
            ));
        }
        Ok(())
    }

    fn list_snapshots(&self, machine: &MachineName) -> Result<Vec<SnapshotInfo>, ControllerError> {
        let mut inner = self.lock();
        begin(&mut inner, MockOp::ListSnapshots, None)?;
        require_exists(&inner, "list_snapshots", machine)?;
        Ok(inner.snapshots.clone())
    }

    fn provision(&self, machine: &MachineName, step: Option<&str>) -> Result<(), ControllerError> {
        let mut inner = self.lock();
        begin(&mut inner, MockOp::Provision, step)?;
        if inner.state != MachineState::Running {
            return Err(ControllerError::failed(
                "provision",
                format!("machine '{machine}' is not running"),
            ));
        }
        Ok(())
    }

    /// Commands containing `rm -rf` wipe the seeded guest files; any other
    /// command is treated as the readiness probe.
    fn guest_exec(
        &self,
        machine: &MachineName,
        command: &str,
    ) -> Result<GuestOutput, ControllerError> {
        let mut inner = self.lock();
        begin(&mut inner, MockOp::GuestExec, Some(command))?;
        if inner.state != MachineState::Running {
            return Err(ControllerError::failed(
                "guest_exec",
                format!("machine '{machine}' is not running"),
            ));
        }
        if command.contains("rm -rf") {
            inner.guest_files.clear();
            return Ok(GuestOutput {
                success: true,
                ..Default::default()
            });
        }
        inner.polls_since_boot += 1;
        let ready = inner
            .ready_after_polls
            .is_some_and(|needed| inner.polls_since_boot >= needed);
        Ok(GuestOutput {
            success: ready,
            stdout: if ready { "1234\n".into() } else { String::new() },
            stderr: String::new(),
        })
    }

    fn remove_base_image(&self, _machine: &MachineName) -> Result<(), ControllerError> {
        let mut inner = self.lock();
        begin(&mut inner, MockOp::RemoveBaseImage, None)?;
        if !inner.base_image_present {
            return Err(ControllerError::failed(
                "remove_base_image",
                "The box you requested to be removed could not be found",
            ));
        }
        inner.base_image_present = false;
        Ok(())
    }
}
