use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error(
        "Name of destination folder not provided in file {0:?}. Use syntax 'destfolder <foldername>'"
    )]
    MissingDestination(PathBuf),
    #[error("Folder {0:?} does not exist in the current directory")]
    DestinationNotFound(PathBuf),
    #[error("Folder {0:?} contains no simulation folders")]
    NoSimulations(PathBuf),
    #[error("No sSystemName found in the primary input file {0:?}")]
    MissingSystemName(PathBuf),
    #[error("Failed to read {path:?}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("Simulator config is invalid")]
    InvalidConfig(#[from] serde_yaml::Error),
    #[error("Simulator config failed the preflight checks")]
    FailedPreflight,
    #[error("File {0:?} not found")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[source] Error),
    #[error("This build has no archive support, rebuild with the `archive` feature")]
    ArchiveUnsupported,
}

/// How a single simulation is run, loaded from an optional YAML file
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SimulatorConfig {
    // simulator executable, either a path or a name looked up in PATH
    #[serde(default = "default_exec")]
    pub exec: PathBuf,
    // arguments passed for every run, the working directory is the simulation folder
    #[serde(default = "default_params")]
    pub params: Vec<String>,
    // arguments for the one-time help/metadata fetch
    #[serde(default = "default_help_params")]
    pub help_params: Vec<String>,
    // name of the per-simulation log, output of every attempt gets appended
    #[serde(default = "default_log")]
    pub log: String,
    // seconds until a run is killed and counted as failed, none means wait forever
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            exec: default_exec(),
            params: default_params(),
            help_params: default_help_params(),
            log: default_log(),
            timeout: None,
        }
    }
}

impl SimulatorConfig {
    /// load the config file if one was given, fall back to the vplanet defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigErrors> {
        let config = match path {
            Some(path) => {
                let content =
                    fs::read_to_string(path).map_err(|source| ConfigErrors::ReadFailed {
                        path: path.to_path_buf(),
                        source,
                    })?;

                serde_yaml::from_str(&content)?
            }
            None => Self::default(),
        };

        debug!(config = ?config, "Loaded simulator config");

        if config.preflight_checks() {
            Err(ConfigErrors::FailedPreflight)
        } else {
            Ok(config)
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// report every problem at once, returns true if any were found
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.exec.as_os_str().is_empty() {
            error!("exec must name the simulator executable");
            contains_error = true;
        } else if self.exec.components().count() > 1 {
            // bare names are resolved through PATH at spawn time, paths can be checked now
            match check_executable(&self.exec) {
                Ok(true) => {}
                Ok(false) => {
                    error!("Simulator {} is not executable", self.exec.to_string_lossy());
                    contains_error = true;
                }
                Err(e) => {
                    error!(
                        "Failed to determine if exec ({}) is an executable: {e}",
                        self.exec.to_string_lossy()
                    );
                    contains_error = true;
                }
            }
        }

        if self.log.is_empty() || self.log.contains('/') {
            error!(
                "log ({}) must be a plain file name inside the simulation folder",
                self.log
            );
            contains_error = true;
        }

        if self.timeout == Some(0) {
            error!("timeout cannot be 0, leave it out to wait for runs indefinitely");
            contains_error = true;
        }

        contains_error
    }
}

fn default_exec() -> PathBuf {
    PathBuf::from("vplanet")
}

fn default_params() -> Vec<String> {
    vec!["vpl.in".to_owned()]
}

fn default_help_params() -> Vec<String> {
    vec!["-H".to_owned()]
}

fn default_log() -> String {
    "vplanet_log".to_owned()
}
