//! Shared library for testvm.
//!
//! Domain types, the VM controller seam and its in-memory fake, the error
//! taxonomy, configuration, logging setup and the session logger.

pub mod config;
pub mod controller;
pub mod errors;
pub mod logging;
pub mod mock;
pub mod session;
pub mod testing;
pub mod types;

pub use config::{ConfigError, TestvmConfig};
pub use controller::{ControllerError, GuestOutput, VmController};
pub use errors::{ErrorCode, OrchestratorError};
pub use logging::{LogConfig, LoggingGuards, init_logging};
pub use mock::{MockOp, MockVmController};
pub use session::{SessionError, SessionHandle, SessionLog, read_history};
pub use types::{
    CLEAN_SNAPSHOT, CleanupLevel, MachineName, MachineState, OperationOutcome, PRISTINE_SNAPSHOT,
    SnapshotInfo, SnapshotTier,
};
