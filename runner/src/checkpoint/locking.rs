use super::CheckpointError;
use nix::{
    errno::Errno,
    fcntl::{flock, FlockArg},
};
use std::{
    fs::{File, OpenOptions},
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};
use tracing::{error, trace};

/* Advisory lock shared by every worker process of a single run.
 * - flock(2) locks belong to the open file description, so every acquire opens the file anew
 *   and two handles in the same process exclude each other just like two processes do
 * - the kernel drops the lock when the holder dies, a killed worker can't wedge the run
 * - the ledger itself is replaced by rename on every write, so the lock has to live in a
 *   separate file with a stable inode
 * */

#[derive(Debug, Clone)]
pub struct LedgerLock {
    path: PathBuf,
}

/// Held exclusive lock, released on drop
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LedgerLock {
    /// bind to a lock file, it is created on first acquire
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// make sure the lock file exists before workers start contending for it
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let lock = Self::new(path);
        lock.open()?;

        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<File, CheckpointError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)
            .map_err(|source| CheckpointError::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// block until the exclusive lock is held
    pub fn acquire(&self) -> Result<LockGuard, CheckpointError> {
        let file = self.open()?;

        loop {
            match flock(file.as_raw_fd(), FlockArg::LockExclusive) {
                Ok(()) => break,
                Err(Errno::EINTR) => continue,
                Err(source) => {
                    return Err(CheckpointError::Lock {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }

        trace!(path = ?self.path, "Acquired ledger lock");

        Ok(LockGuard {
            file,
            path: self.path.clone(),
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // closing the descriptor releases the lock as well, unlocking explicitly just makes
        // the release visible in the logs
        match flock(self.file.as_raw_fd(), FlockArg::Unlock) {
            Ok(()) => trace!(path = ?self.path, "Released ledger lock"),
            Err(error) => error!(error = ?error, path = ?self.path, "Failed to release ledger lock"),
        }
    }
}
