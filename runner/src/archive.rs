#[cfg(feature = "archive")]
pub mod sqlite;


use crate::{
    checkpoint::CheckpointError,
    executors::SimulatorHelp,
    ingest::{ArchiveEntry, IngestorError},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[cfg(feature = "archive")]
    #[error("SQLite Error")]
    SQLite(#[from] rusqlite::Error),
    #[error("Failed to gather simulation data")]
    Ingest(#[from] IngestorError),
    #[error("Failed to serialize archive access")]
    Lock(#[from] CheckpointError),
}

/// Shared store for the results of finished simulations
pub trait Archive {
    /// store `entry` under its key, returns false if the key was already archived
    fn store(&self, entry: &ArchiveEntry, help: &SimulatorHelp) -> Result<bool, ArchiveError>;
}
