mod local;


pub use local::LocalExecutor;

use serde::{Deserialize, Serialize};
use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to spawn simulator {exec:?}")]
    Spawn {
        exec: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to wait for a child proccess")]
    ChildError(#[from] io::Error),
    #[error("Simulator help fetch failed with status {0:?}")]
    HelpFailed(Option<i32>),
}

#[derive(Debug, Clone, Default)]
/// container for information extracted from running a simulation
pub struct RunOutput {
    pub runtime: Duration,
    pub stdout: String,
    pub stderr: String,
    /// exit code, `None` if the process was ended by a signal
    pub status: Option<i32>,
    pub timed_out: bool,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0) && !self.timed_out
    }
}

/// Output of the one-time simulator help call, handed read-only to every worker
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SimulatorHelp {
    pub text: String,
}

/// Runs a single simulation to completion
pub trait Executor {
    fn execute(&self, simulation: &Path) -> Result<RunOutput, ExecutorError>;
}
