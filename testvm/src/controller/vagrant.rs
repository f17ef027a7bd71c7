//! Production controller: Vagrant for lifecycle and provisioning,
//! VBoxManage for power control and snapshots.

use super::runner::CommandRunner;
use testvm_common::config::MachineConfig;
use testvm_common::{
    ControllerError, GuestOutput, MachineName, MachineState, SnapshotInfo, VmController,
};
use tracing::debug;

const VAGRANT: &str = "vagrant";
const VBOXMANAGE: &str = "VBoxManage";

/// VBoxManage prints this instead of an empty list.
const NO_SNAPSHOTS_MARKER: &str = "does not have any snapshots";

#[derive(Debug)]
pub struct VagrantController {
    runner: CommandRunner,
    vbox_name: Option<String>,
    box_name: String,
}

impl VagrantController {
    pub fn new(runner: CommandRunner, config: &MachineConfig) -> Self {
        Self {
            runner,
            vbox_name: config.vbox_name.clone(),
            box_name: config.box_name.clone(),
        }
    }

    /// The VirtualBox VM backing `machine`.
    fn vbox<'a>(&'a self, machine: &'a MachineName) -> &'a str {
        self.vbox_name.as_deref().unwrap_or(machine.as_str())
    }

    fn vagrant(&self, args: &[&str]) -> Result<String, ControllerError> {
        Ok(self.runner.run_checked(VAGRANT, args)?.stdout)
    }

    fn vboxmanage(&self, args: &[&str]) -> Result<String, ControllerError> {
        Ok(self.runner.run_checked(VBOXMANAGE, args)?.stdout)
    }
}

impl VmController for VagrantController {
    fn machine_state(&self, machine: &MachineName) -> Result<MachineState, ControllerError> {
        let stdout = self.vagrant(&["status", machine.as_str(), "--machine-readable"])?;
        parse_vagrant_status(&stdout, machine.as_str())
    }

    fn create_and_start(&self, machine: &MachineName) -> Result<(), ControllerError> {
        self.vagrant(&["up", machine.as_str()]).map(drop)
    }

    fn start(&self, machine: &MachineName) -> Result<(), ControllerError> {
        self.vagrant(&["up", machine.as_str(), "--no-provision"])
            .map(drop)
    }

    fn stop(&self, machine: &MachineName) -> Result<(), ControllerError> {
        self.vboxmanage(&["controlvm", self.vbox(machine), "acpipowerbutton"])
            .map(drop)
    }

    fn power_off(&self, machine: &MachineName) -> Result<(), ControllerError> {
        self.vboxmanage(&["controlvm", self.vbox(machine), "poweroff"])
            .map(drop)
    }

    fn destroy(&self, machine: &MachineName) -> Result<(), ControllerError> {
        self.vagrant(&["destroy", "-f", machine.as_str()]).map(drop)
    }

    fn take_snapshot(
        &self,
        machine: &MachineName,
        name: &str,
        description: &str,
    ) -> Result<(), ControllerError> {
        self.vboxmanage(&[
            "snapshot",
            self.vbox(machine),
            "take",
            name,
            "--description",
            description,
        ])
        .map(drop)
    }

    fn restore_snapshot(&self, machine: &MachineName, name: &str) -> Result<(), ControllerError> {
        self.vboxmanage(&["snapshot", self.vbox(machine), "restore", name])
            .map(drop)
    }

    fn delete_snapshot(&self, machine: &MachineName, name: &str) -> Result<(), ControllerError> {
        self.vboxmanage(&["snapshot", self.vbox(machine), "delete", name])
            .map(drop)
    }

    fn list_snapshots(&self, machine: &MachineName) -> Result<Vec<SnapshotInfo>, ControllerError> {
        let output = self.runner.run(
            VBOXMANAGE,
            &["snapshot", self.vbox(machine), "list", "--machinereadable"],
        )?;
        if output.stdout.contains(NO_SNAPSHOTS_MARKER) || output.stderr.contains(NO_SNAPSHOTS_MARKER)
        {
            return Ok(Vec::new());
        }
        if !output.success {
            return Err(ControllerError::failed(
                "VBoxManage snapshot list",
                output.diagnostic(),
            ));
        }
        Ok(parse_snapshot_list(&output.stdout))
    }

    fn provision(&self, machine: &MachineName, step: Option<&str>) -> Result<(), ControllerError> {
        let mut args = vec!["provision", machine.as_str()];
        if let Some(step) = step {
            args.extend(["--provision-with", step]);
        }
        self.vagrant(&args).map(drop)
    }

    fn guest_exec(
        &self,
        machine: &MachineName,
        command: &str,
    ) -> Result<GuestOutput, ControllerError> {
        let output = self
            .runner
            .run(VAGRANT, &["ssh", machine.as_str(), "-c", command])?;
        debug!(machine = %machine, command, success = output.success, "Guest command finished");
        Ok(GuestOutput {
            success: output.success,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn remove_base_image(&self, _machine: &MachineName) -> Result<(), ControllerError> {
        self.vagrant(&["box", "remove", &self.box_name, "--force"])
            .map(drop)
    }
}

/// Parse `vagrant status --machine-readable`.
///
/// Lines look like `1700000000,testvm,state,running`. `not_created` means the
/// machine does not exist; every other non-running state counts as stopped.
pub fn parse_vagrant_status(stdout: &str, machine: &str) -> Result<MachineState, ControllerError> {
    let state = stdout
        .lines()
        .map(|line| line.splitn(4, ',').collect::<Vec<_>>())
        .find(|fields| fields.len() == 4 && fields[1] == machine && fields[2] == "state")
        .map(|fields| fields[3].trim().to_string())
        .ok_or_else(|| ControllerError::Parse {
            operation: "vagrant status".to_string(),
            detail: format!("no state line for machine '{machine}'"),
        })?;

    // States in which VirtualBox still holds a live session count as
    // running, so stop and power-off are issued before any restore.
    Ok(match state.as_str() {
        "running" | "paused" | "gurumeditation" | "stuck" | "stopping" | "starting"
        | "restoring" | "saving" | "teleporting" | "livesnapshotting"
        | "deletingsnapshotlive" | "deletingsnapshotlivepaused" => MachineState::Running,
        "not_created" => MachineState::NotFound,
        _ => MachineState::Stopped,
    })
}

/// Parse `VBoxManage snapshot <vm> list --machinereadable`.
///
/// Names and descriptions are keyed by a shared suffix (`SnapshotName-1-2`
/// pairs with `SnapshotDescription-1-2`). The tree is flattened in listing
/// order; `CurrentSnapshot*` lines are ignored.
pub fn parse_snapshot_list(stdout: &str) -> Vec<SnapshotInfo> {
    let mut snapshots: Vec<(String, SnapshotInfo)> = Vec::new();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        if let Some(suffix) = key.strip_prefix("SnapshotName") {
            snapshots.push((suffix.to_string(), SnapshotInfo::new(value, "")));
        } else if let Some(suffix) = key.strip_prefix("SnapshotDescription")
            && let Some((_, info)) = snapshots.iter_mut().find(|(s, _)| s == suffix)
        {
            info.description = value.to_string();
        }
    }
    snapshots.into_iter().map(|(_, info)| info).collect()
}
