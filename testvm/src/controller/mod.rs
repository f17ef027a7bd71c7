//! VM controller implementations.

pub mod runner;
pub mod vagrant;

pub use runner::CommandRunner;
pub use vagrant::VagrantController;

use testvm_common::ControllerError;
use testvm_common::config::TestvmConfig;

/// Build the production controller from configuration.
pub fn from_config(config: &TestvmConfig) -> Result<VagrantController, ControllerError> {
    let runner = CommandRunner::new(
        config.timeouts.command(),
        config.machine.vagrant_dir.clone(),
    )?;
    Ok(VagrantController::new(runner, &config.machine))
}
