
use crate::{
    checkpoint::{CheckpointError, CheckpointStore},
    collector::Sweep,
    ledger::{Ledger, LedgerError, Status, Summary, WorkItem, HEADER_LINES},
};
use std::{
    collections::HashSet,
    io,
    path::{self, Path, PathBuf},
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to migrate checkpoint")]
    Checkpoint(#[from] CheckpointError),
    #[error("Failed to clean simulation outputs for a forced restart")]
    CleanOutputs(#[source] io::Error),
}

/// What a repaired ledger means for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// work is left, workers should start
    Resumed(Summary),
    /// everything had run and the sweep was reset because of the force flag
    Restarted(Summary),
    /// everything has run, no worker should start
    AlreadyComplete(Summary),
}

/// Changes applied by `migrate`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Migration {
    /// in progress items handed back to pending
    pub reset: usize,
    /// discovered items the ledger didn't know yet
    pub appended: usize,
    /// the terminator line was missing and has been restored
    pub restored_terminator: bool,
    /// the header was cut short and has been rewritten
    pub restored_header: bool,
}

/// bring a ledger of an interrupted run into a consistent state
pub fn migrate(
    ledger: &mut Ledger,
    source: &Path,
    discovered: &[PathBuf],
) -> Result<Migration, LedgerError> {
    let mut migration = Migration::default();

    for item in ledger.items.iter_mut() {
        if item.status == Status::InProgress {
            item.status = Status::Pending;
            migration.reset += 1;
        }
    }

    // ledger entries may be relative to the directory of the run that wrote them
    let mut known = HashSet::with_capacity(ledger.items.len() * 2);
    for item in ledger.items.iter() {
        known.insert(item.path.clone());
        if let Ok(absolute) = path::absolute(&item.path) {
            known.insert(absolute);
        }
    }

    for path in discovered {
        if known.insert(path.clone()) {
            ledger.items.push(WorkItem::pending(path.clone())?);
            migration.appended += 1;
        }
    }

    if !ledger.terminated {
        ledger.terminated = true;
        migration.restored_terminator = true;
    }

    // otherwise the first items would be written where the header belongs
    if ledger.header.len() < HEADER_LINES {
        ledger.header = Ledger::standard_header(source, ledger.items.len());
        migration.restored_header = true;
    }

    Ok(migration)
}

/// repair the ledger of a previous run before any worker starts
pub fn reconcile(
    store: &CheckpointStore,
    sweep: &Sweep,
    force: bool,
) -> Result<Reconciliation, ReconcileError> {
    warn!(path = ?store.path(), "Checkpoint file already exists, resuming");

    let source = path::absolute(&sweep.input_file).map_err(|source| CheckpointError::Io {
        path: sweep.input_file.clone(),
        source,
    })?;

    let (migration, summary, complete) = store.update(|ledger| {
        let migration = migrate(ledger, &source, &sweep.simulations)?;

        Ok((migration, ledger.summary(), ledger.is_complete()))
    })?;

    info!(
        reset = migration.reset,
        appended = migration.appended,
        restored_terminator = migration.restored_terminator,
        restored_header = migration.restored_header,
        "Migrated checkpoint"
    );

    if !complete {
        return Ok(Reconciliation::Resumed(summary));
    }

    info!("All simulations have been ran");

    if !force {
        return Ok(Reconciliation::AlreadyComplete(summary));
    }

    info!(destination = ?sweep.destination, "Forced restart, removing simulation outputs");
    let removed = sweep
        .clean_outputs()
        .map_err(ReconcileError::CleanOutputs)?;
    info!(removed = removed, "Removed simulation outputs");

    info!(path = ?store.path(), "Recreating checkpoint file");
    store.remove()?;
    let ledger = store.initialize(&sweep.input_file, &sweep.simulations)?;

    Ok(Reconciliation::Restarted(ledger.summary()))
}
