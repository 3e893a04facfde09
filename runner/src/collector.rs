
use crate::config::ConfigErrors;
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use std::{
    env, fs,
    io::{self, ErrorKind},
    path::{self, Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Everything known about a sweep before any simulation runs
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    /// the sweep (vspace) file as given by the user
    pub input_file: PathBuf,
    /// absolute folder holding one sub folder per simulation
    pub destination: PathBuf,
    /// input files every simulation folder carries
    pub in_files: Vec<String>,
    /// absolute simulation folders, sorted
    pub simulations: Vec<PathBuf>,
    pub system_name: String,
    pub bodies: Vec<String>,
}

fn read_file(path: &Path) -> Result<String, ConfigErrors> {
    fs::read_to_string(path).map_err(|source| ConfigErrors::ReadFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// whitespace separated tokens of every non-empty line
fn parameter_lines(content: &str) -> impl Iterator<Item = Vec<&str>> {
    content
        .lines()
        .map(|line| line.split_whitespace().collect_vec())
        .filter(|tokens| !tokens.is_empty())
}

/// read the destination folder name and the input file names from a sweep file
pub fn read_sweep_file(input_file: &Path) -> Result<(PathBuf, Vec<String>), ConfigErrors> {
    let content = read_file(input_file)?;
    let mut destination = None;
    let mut in_files = Vec::new();

    for tokens in parameter_lines(&content) {
        match tokens.as_slice() {
            ["sDestFolder" | "destfolder", folder, ..] => destination = Some(PathBuf::from(folder)),
            ["sBodyFile" | "sPrimaryFile" | "file", file, ..] => in_files.push(file.to_string()),
            _ => {}
        }
    }

    match destination {
        Some(destination) => Ok((destination, in_files)),
        None => Err(ConfigErrors::MissingDestination(input_file.to_path_buf())),
    }
}

/// sorted absolute sub folders of `destination`
pub fn list_simulations(destination: &Path) -> Vec<PathBuf> {
    WalkBuilder::new(destination)
        .max_depth(Some(1))
        .standard_filters(false)
        .follow_links(true)
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to search for simulation folders: {e}");
                None
            }
        })
        .filter(|entry| entry.depth() == 1)
        .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_dir()))
        .map(DirEntry::into_path)
        .sorted()
        .collect_vec()
}

/// system name from the primary input file, body names from all others in order
pub fn read_names(
    in_files: &[String],
    simulation: &Path,
) -> Result<(String, Vec<String>), ConfigErrors> {
    let mut system_name = None;
    let mut bodies = Vec::new();

    for file in in_files {
        let path = simulation.join(file);
        let content = read_file(&path)?;
        let is_primary = file.contains("vpl.in");

        for tokens in parameter_lines(&content) {
            match tokens.as_slice() {
                ["sSystemName", name, ..] if is_primary => system_name = Some(name.to_string()),
                ["sName", name, ..] if !is_primary => bodies.push(name.to_string()),
                _ => {}
            }
        }
    }

    match system_name {
        Some(system_name) => Ok((system_name, bodies)),
        None => Err(ConfigErrors::MissingSystemName(simulation.to_path_buf())),
    }
}

/// ledger location for a destination folder, `.<folder name>` in the working directory
pub fn checkpoint_path(destination: &Path) -> Result<PathBuf, ConfigErrors> {
    Ok(working_dir()?.join(format!(".{}", folder_name(destination))))
}

fn folder_name(destination: &Path) -> String {
    destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| destination.to_string_lossy().into_owned())
}

fn working_dir() -> Result<PathBuf, ConfigErrors> {
    env::current_dir().map_err(|source| ConfigErrors::ReadFailed {
        path: PathBuf::from("."),
        source,
    })
}

impl Sweep {
    /// discover all simulations of a sweep, fails before anything is written
    pub fn discover(input_file: &Path) -> Result<Self, ConfigErrors> {
        let (destination, in_files) = read_sweep_file(input_file)?;

        if !destination.is_dir() {
            return Err(ConfigErrors::DestinationNotFound(destination));
        }

        let destination =
            path::absolute(&destination).map_err(|source| ConfigErrors::ReadFailed {
                path: destination.clone(),
                source,
            })?;
        let simulations = list_simulations(&destination);

        let Some(first) = simulations.first() else {
            return Err(ConfigErrors::NoSimulations(destination));
        };
        let (system_name, bodies) = read_names(&in_files, first)?;

        info!(
            destination = ?destination,
            simulations = simulations.len(),
            system = %system_name,
            "Discovered sweep"
        );
        debug!(bodies = ?bodies, in_files = ?in_files, "Sweep input files");

        Ok(Self {
            input_file: input_file.to_path_buf(),
            destination,
            in_files,
            simulations,
            system_name,
            bodies,
        })
    }

    /// log file the simulator writes into every simulation folder
    pub fn log_file(&self) -> String {
        format!("{}.log", self.system_name)
    }

    pub fn checkpoint_path(&self) -> Result<PathBuf, ConfigErrors> {
        checkpoint_path(&self.destination)
    }

    /// shared archive, `<folder name>.bpa` in the working directory
    pub fn archive_path(&self) -> Result<PathBuf, ConfigErrors> {
        Ok(working_dir()?.join(format!("{}.bpa", folder_name(&self.destination))))
    }

    /// remove everything but the input files from every simulation folder
    pub fn clean_outputs(&self) -> io::Result<usize> {
        let mut removed = 0;

        for simulation in self.simulations.iter() {
            let entries = match fs::read_dir(simulation) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            for entry in entries {
                let entry = entry?;
                let keep = entry
                    .file_name()
                    .to_str()
                    .map_or(false, |name| self.in_files.iter().any(|file| file == name));

                if keep {
                    continue;
                }

                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(entry.path())?;
                } else {
                    fs::remove_file(entry.path())?;
                }

                debug!(path = ?entry.path(), "Removed simulation output");
                removed += 1;
            }
        }

        Ok(removed)
    }
}
