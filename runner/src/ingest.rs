#[cfg(test)]
mod ingest_test;

use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum IngestorError {
    #[error("Simulation output {0:?} is missing")]
    MissingOutput(PathBuf),
    #[error("Failed to read simulation file {path:?}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
/// container for information related to a sweep that ingesting a simulation needs,
/// e.g., system name, body names, file names
pub struct RunContext {
    pub system_name: String,
    pub bodies: Vec<String>,
    pub log_file: String,
    pub in_files: Vec<String>,
}

/// Gathered result data of one simulation, ready to be archived
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    pub key: String,
    pub path: PathBuf,
    pub files: Vec<(String, Vec<u8>)>,
}

/// key a simulation is archived under, the base name of its folder
pub fn archive_key(simulation: &Path) -> String {
    simulation
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| simulation.to_string_lossy().into_owned())
}

fn read(path: &Path) -> Result<Vec<u8>, IngestorError> {
    fs::read(path).map_err(|source| IngestorError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })
}

impl RunContext {
    /// forward files the simulator writes per body
    pub fn forward_files(&self) -> Vec<String> {
        self.bodies
            .iter()
            .map(|body| format!("{}.{body}.forward", self.system_name))
            .collect()
    }

    /// collect the simulator log, the forward files and the inputs of a finished simulation
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn gather(&self, simulation: &Path) -> Result<ArchiveEntry, IngestorError> {
        let log = simulation.join(&self.log_file);
        if !log.is_file() {
            return Err(IngestorError::MissingOutput(log));
        }

        let mut files = vec![(self.log_file.clone(), read(&log)?)];

        for name in self.forward_files() {
            let path = simulation.join(&name);

            // bodies without forward integration have no forward file
            if path.is_file() {
                files.push((name, read(&path)?));
            } else {
                trace!(path = ?path, "No forward file");
            }
        }

        for name in self.in_files.iter() {
            // a name is stored once per simulation, the first occurrence wins
            if files.iter().any(|(gathered, _)| gathered == name) {
                trace!(file = %name, "Already gathered");
                continue;
            }

            files.push((name.clone(), read(&simulation.join(name))?));
        }

        debug!(files = files.len(), "Gathered simulation data");

        Ok(ArchiveEntry {
            key: archive_key(simulation),
            path: simulation.to_path_buf(),
            files,
        })
    }
}
