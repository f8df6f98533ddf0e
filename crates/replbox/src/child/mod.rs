//! Interpreter child management
//!
//! Spawning, limiting, terminating and reaping the interpreter process
//! that runs the user's script and then serves the interactive phase.

use thiserror::Error;

pub use crate::child::driver::{
    DriverScript, FIGURE_BEGIN_SENTINEL, FIGURE_END_SENTINEL, INPUT_REQUEST_SENTINEL,
    REPL_READY_SENTINEL,
};
pub use crate::child::supervisor::{ChildProcess, exit_code};

use crate::protocol::ErrorKind;

pub mod driver;
mod limits;
mod supervisor;

/// Errors that occur while managing the interpreter child
#[derive(Debug, Error)]
pub enum ChildError {
    #[error("failed to spawn interpreter: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("failed to install resource limits: {0}")]
    LimitInstall(#[source] std::io::Error),

    #[error("failed to stage driver program: {0}")]
    DriverStaging(#[source] std::io::Error),

    #[error("stdin is closed")]
    StdinClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChildError {
    /// The protocol error category this failure is reported under
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ChildError::SpawnFailed(_) | ChildError::DriverStaging(_) => ErrorKind::SpawnFailed,
            ChildError::LimitInstall(_) => ErrorKind::LimitInstallFailed,
            ChildError::StdinClosed | ChildError::Io(_) => ErrorKind::Internal,
        }
    }
}
