pub mod locking;

#[cfg(test)]
mod checkpoint_test;

use crate::ledger::{Ledger, LedgerError, Status};
use locking::{LedgerLock, LockGuard};
use std::{
    ffi::OsString,
    fs::{self, File},
    io::{self, Write},
    path::{self, Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Failed to access checkpoint file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Checkpoint file {path:?} is corrupt")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: LedgerError,
    },
    #[error("Failed to lock {path:?}")]
    Lock {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("Invalid work item")]
    InvalidItem(#[from] LedgerError),
}

/// Sole owner of the ledger file
///
/// Every operation runs as one critical section: lock, read the whole file, mutate in memory,
/// write the whole file to a sibling and rename it over the ledger, unlock.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    lock: LedgerLock,
}

/// lock file used for a ledger, `<ledger>.lock`
pub fn lock_path(ledger: &Path) -> PathBuf {
    with_suffix(ledger, ".lock")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);

    path.with_file_name(name)
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>, lock: LedgerLock) -> Self {
        Self {
            path: path.into(),
            lock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock(&self) -> &LedgerLock {
        &self.lock
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// write a fresh ledger with every item pending
    pub fn initialize(&self, source: &Path, items: &[PathBuf]) -> Result<Ledger, CheckpointError> {
        let source = path::absolute(source).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;
        let ledger = Ledger::new(&source, items.iter().cloned())?;

        let _guard = self.lock.acquire()?;
        self.persist(&ledger)?;

        info!(path = ?self.path, items = ledger.items.len(), "Created checkpoint file");

        Ok(ledger)
    }

    /// claim the first pending item in ledger order, `None` once nothing is left to claim
    pub fn claim_next(&self) -> Result<Option<PathBuf>, CheckpointError> {
        let claimed = self.modify(|ledger| {
            let Some(item) = ledger.first_pending_mut() else {
                return Ok(None);
            };

            let absolute = path::absolute(&item.path).map_err(|source| CheckpointError::Io {
                path: item.path.clone(),
                source,
            })?;
            item.status = Status::InProgress;

            Ok(Some(absolute))
        })?;

        match claimed {
            Some(ref path) => debug!(path = ?path, "Claimed work item"),
            None => debug!("No pending work items left"),
        }

        Ok(claimed)
    }

    pub fn report_complete(&self, path: &Path) -> Result<(), CheckpointError> {
        self.set_status(path, Status::Complete)
    }

    /// hand the item back for another attempt by any worker
    pub fn report_failed(&self, path: &Path) -> Result<(), CheckpointError> {
        self.set_status(path, Status::Pending)
    }

    fn set_status(&self, path: &Path, status: Status) -> Result<(), CheckpointError> {
        let found = self.modify(|ledger| {
            Ok(ledger.find_mut(path).map(|item| {
                item.status = status;
            }))
        })?;

        match found {
            Some(()) => debug!(path = ?path, status = ?status, "Updated work item"),
            None => debug!(path = ?path, "Work item isn't part of the ledger, ignoring report"),
        }

        Ok(())
    }

    /// read the current ledger under the lock
    pub fn load(&self) -> Result<Ledger, CheckpointError> {
        let _guard = self.lock.acquire()?;

        self.read()
    }

    /// run `update` as a critical section, the ledger is only written back if it returns `Some`
    pub fn modify<T, F>(&self, update: F) -> Result<Option<T>, CheckpointError>
    where
        F: FnOnce(&mut Ledger) -> Result<Option<T>, CheckpointError>,
    {
        let _guard = self.lock.acquire()?;
        let mut ledger = self.read()?;

        let result = update(&mut ledger)?;
        if result.is_some() {
            self.persist(&ledger)?;
        }

        Ok(result)
    }

    /// like `modify`, but the ledger is always written back
    pub fn update<T, F>(&self, update: F) -> Result<T, CheckpointError>
    where
        F: FnOnce(&mut Ledger) -> Result<T, CheckpointError>,
    {
        let _guard = self.lock.acquire()?;
        let mut ledger = self.read()?;

        let result = update(&mut ledger)?;
        self.persist(&ledger)?;

        Ok(result)
    }

    /// hold the ledger lock while running `critical`, used to serialize archive writes
    pub fn exclusive<T>(&self, critical: impl FnOnce() -> T) -> Result<T, CheckpointError> {
        let guard: LockGuard = self.lock.acquire()?;
        let result = critical();
        drop(guard);

        Ok(result)
    }

    /// delete the ledger file, used when a finished sweep is forced to start over
    pub fn remove(&self) -> Result<(), CheckpointError> {
        let _guard = self.lock.acquire()?;

        fs::remove_file(&self.path).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn read(&self) -> Result<Ledger, CheckpointError> {
        let text = fs::read_to_string(&self.path).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ledger::decode(&text).map_err(|source| CheckpointError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn persist(&self, ledger: &Ledger) -> Result<(), CheckpointError> {
        let staging = with_suffix(&self.path, ".tmp");
        let io_error = |source: io::Error| CheckpointError::Io {
            path: staging.clone(),
            source,
        };

        let mut file = File::create(&staging).map_err(io_error)?;
        file.write_all(ledger.encode().as_bytes()).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        drop(file);

        fs::rename(&staging, &self.path).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
