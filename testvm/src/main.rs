//! testvm - lifecycle manager for a reusable test VM.
//!
//! Keeps a Vagrant/VirtualBox machine in a known-good state between test
//! runs: tiered snapshots (pristine, clean, custom), a fallback restoration
//! protocol, guest readiness polling and graduated cleanup levels.

#![forbid(unsafe_code)]

mod cleanup;
mod commands;
mod confirm;
mod controller;
mod lock;
mod orchestrator;
mod probe;
mod readiness;
mod restore;
mod snapshots;
mod trap;
mod ui;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use cleanup::HostPolicy;
use cleanup::host::HostArtifacts;
use commands::{CommandContext, CommandOutput, cleanup as cleanup_cmd, history, vm};
use confirm::TerminalConfirm;
use orchestrator::{Orchestrator, OrchestratorSettings};
use std::path::PathBuf;
use std::process::ExitCode;
use testvm_common::config::{EnvParser, Severity, validate_config};
use testvm_common::{
    CLEAN_SNAPSHOT, CleanupLevel, LogConfig, OrchestratorError, SessionLog, TestvmConfig,
    VmController, init_logging,
};
use tracing::{debug, error, warn};
use trap::ExitTrap;
use ui::OutputContext;

#[derive(Parser)]
#[command(name = "testvm")]
#[command(author, version, about = "Snapshot-tiered lifecycle manager for a reusable test VM")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Skip confirmations and the interactive cleanup menu
    #[arg(short, long, global = true)]
    force: bool,

    /// Print a JSON envelope instead of styled text
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ./testvm.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Machine name, overriding configuration and TESTVM_MACHINE
    #[arg(long, global = true)]
    machine: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show machine state, snapshots and lock holder
    VmStatus,
    /// Start the machine, creating it if needed
    VmStart,
    /// Shut the machine down, forcing power off if it does not respond
    VmStop,
    /// Provision from scratch and create the clean and pristine snapshots
    VmInit,
    /// Force power off, boot (creating the machine if missing) and re-provision
    VmRestart,
    /// Restore the clean snapshot, offering vm-restart if that fails
    VmReset,
    /// Destroy and rebuild the machine from scratch
    VmRebuild,
    /// Take a named snapshot (overwrites an existing one of the same name)
    VmSnapshot {
        #[arg(default_value = CLEAN_SNAPSHOT)]
        name: String,
    },
    /// Restore a named snapshot and start the machine
    VmRestore {
        #[arg(default_value = CLEAN_SNAPSHOT)]
        name: String,
    },
    /// List snapshots
    VmList,
    /// Create the pristine snapshot for distribution
    VmPristine,
    /// Restore the pristine snapshot and start the machine
    VmClone,
    /// Restore the best available baseline and sync the test payload
    VmReady,
    /// Make the machine ready, then run the configured test command
    RunTests {
        /// Extra arguments passed to the test command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Show recent sessions
    VmHistory {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Choose a cleanup level interactively
    Cleanup {
        /// Run this level directly (required with --force)
        #[arg(long)]
        level: Option<CleanupLevel>,
    },
    /// Delete host-side logs, reports, results and artifacts
    CleanupData {
        #[arg(value_enum, default_value_t = DataScope::Basic)]
        scope: DataScope,
    },
    /// Delete test artifacts inside the running guest
    CleanupVm,
    /// Restore the machine to the clean snapshot
    CleanupSnapshots,
    /// Delete everything: data, snapshots, machine and cached base image
    CleanupAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DataScope {
    /// Only artifacts older than the configured age
    Basic,
    /// Every artifact
    Full,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::VmStatus => "vm-status",
            Self::VmStart => "vm-start",
            Self::VmStop => "vm-stop",
            Self::VmInit => "vm-init",
            Self::VmRestart => "vm-restart",
            Self::VmReset => "vm-reset",
            Self::VmRebuild => "vm-rebuild",
            Self::VmSnapshot { .. } => "vm-snapshot",
            Self::VmRestore { .. } => "vm-restore",
            Self::VmList => "vm-list",
            Self::VmPristine => "vm-pristine",
            Self::VmClone => "vm-clone",
            Self::VmReady => "vm-ready",
            Self::RunTests { .. } => "run-tests",
            Self::VmHistory { .. } => "vm-history",
            Self::Cleanup { .. } => "cleanup",
            Self::CleanupData { .. } => "cleanup-data",
            Self::CleanupVm => "cleanup-vm",
            Self::CleanupSnapshots => "cleanup-snapshots",
            Self::CleanupAll => "cleanup-all",
        }
    }
}

fn dispatch<C: VmController>(
    ctx: &CommandContext<C>,
    command: &Commands,
) -> Result<CommandOutput, OrchestratorError> {
    let operation = command.name();
    match command {
        Commands::VmStatus => vm::vm_status(ctx),
        Commands::VmStart => vm::vm_start(ctx),
        Commands::VmStop => vm::vm_stop(ctx),
        Commands::VmInit => vm::vm_init(ctx),
        Commands::VmRestart => vm::vm_restart(ctx),
        Commands::VmReset => vm::vm_reset(ctx),
        Commands::VmRebuild => vm::vm_rebuild(ctx),
        Commands::VmSnapshot { name } => vm::vm_snapshot(ctx, name),
        Commands::VmRestore { name } => vm::vm_restore(ctx, name),
        Commands::VmList => vm::vm_list(ctx),
        Commands::VmPristine => vm::vm_pristine(ctx),
        Commands::VmClone => vm::vm_clone(ctx),
        Commands::VmReady => vm::vm_ready(ctx),
        Commands::RunTests { args } => vm::run_tests(ctx, args),
        Commands::VmHistory { limit } => history::vm_history(ctx, *limit),
        Commands::Cleanup { level } => cleanup_cmd::cleanup(ctx, operation, *level),
        Commands::CleanupData { scope } => {
            let level = match scope {
                DataScope::Basic => CleanupLevel::DataBasic,
                DataScope::Full => CleanupLevel::DataFull,
            };
            cleanup_cmd::cleanup(ctx, operation, Some(level))
        }
        Commands::CleanupVm => cleanup_cmd::cleanup(ctx, operation, Some(CleanupLevel::VmInternalData)),
        Commands::CleanupSnapshots => {
            cleanup_cmd::cleanup(ctx, operation, Some(CleanupLevel::VmSnapshotReset))
        }
        Commands::CleanupAll => cleanup_cmd::cleanup(ctx, operation, Some(CleanupLevel::NuclearReset)),
    }
}

/// File, then `TESTVM_*` environment, then CLI overrides.
fn load_config(cli: &Cli) -> Result<(TestvmConfig, Option<PathBuf>)> {
    let (mut config, path) = TestvmConfig::load(cli.config.as_deref())?;
    let mut env = EnvParser::new();
    config.apply_env(&mut env)?;
    if let Some(machine) = &cli.machine {
        config.machine.name = machine.clone();
    }
    Ok((config, path))
}

fn run(cli: Cli) -> Result<i32> {
    let (config, config_path) = load_config(&cli)?;

    let mut log_config = LogConfig::from_env(&config.general.log_level)
        .with_format(config.general.log_format.clone())
        .with_stderr()
        .with_file_dir(config.paths.logs_dir());
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;
    if let Some(path) = &config_path {
        debug!(path = %path.display(), "Loaded configuration");
    }

    let mut invalid = Vec::new();
    for finding in validate_config(&config) {
        match finding.severity {
            Severity::Warning => warn!(field = finding.field, "{}", finding.message),
            Severity::Error => invalid.push(finding.to_string()),
        }
    }
    if !invalid.is_empty() {
        bail!("invalid configuration:\n  {}", invalid.join("\n  "));
    }

    let host = HostPolicy {
        artifacts: HostArtifacts::new(&config.paths.data_dir),
        basic_max_age: config.cleanup.basic_max_age(),
    };
    let trap = ExitTrap::new(host.artifacts.clone(), host.basic_max_age);
    trap.install_signal_handler();

    let vagrant =
        controller::from_config(&config).context("failed to set up the VM controller")?;
    let ctx = CommandContext {
        orchestrator: Orchestrator::new(
            vagrant,
            config.machine.machine_name(),
            OrchestratorSettings::from_config(&config),
        ),
        sessions: SessionLog::new(config.paths.sessions_dir()),
        host,
        confirm: Box::new(TerminalConfirm),
        force: cli.force,
        locks_dir: config.paths.locks_dir(),
        tests_command: config.tests.command.clone(),
    };

    let name = cli.command.name();
    let result = dispatch(&ctx, &cli.command);
    if let Err(e) = &result
        && !e.is_declined()
    {
        error!(command = name, code = %e.code().code_string(), error = %e, "Command failed");
    }
    let code = OutputContext::new(cli.json).render(name, &result);
    drop(ctx);
    drop(trap);
    Ok(code)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_snapshot_name_defaults_to_clean() {
        let cli = Cli::try_parse_from(["testvm", "vm-restore"]).unwrap();
        assert!(matches!(cli.command, Commands::VmRestore { ref name } if name == "clean"));
        let cli = Cli::try_parse_from(["testvm", "vm-snapshot", "before-upgrade"]).unwrap();
        assert!(matches!(cli.command, Commands::VmSnapshot { ref name } if name == "before-upgrade"));
    }

    #[test]
    fn test_force_is_global() {
        let cli = Cli::try_parse_from(["testvm", "cleanup-all", "--force"]).unwrap();
        assert!(cli.force);
        assert_eq!(cli.command.name(), "cleanup-all");
    }

    #[test]
    fn test_cleanup_data_scope() {
        let cli = Cli::try_parse_from(["testvm", "cleanup-data"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::CleanupData {
                scope: DataScope::Basic
            }
        ));
        let cli = Cli::try_parse_from(["testvm", "cleanup-data", "full"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::CleanupData {
                scope: DataScope::Full
            }
        ));
    }

    #[test]
    fn test_cleanup_level_flag_parses_kebab_names() {
        let cli = Cli::try_parse_from(["testvm", "cleanup", "--level", "vm-snapshot-reset"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cleanup {
                level: Some(CleanupLevel::VmSnapshotReset)
            }
        ));
        assert!(Cli::try_parse_from(["testvm", "cleanup", "--level", "everything"]).is_err());
    }

    #[test]
    fn test_run_tests_passes_through_hyphen_args() {
        let cli = Cli::try_parse_from(["testvm", "run-tests", "--", "--filter", "login"]).unwrap();
        match cli.command {
            Commands::RunTests { args } => assert_eq!(args, vec!["--filter", "login"]),
            _ => panic!("expected run-tests"),
        }
    }
}
