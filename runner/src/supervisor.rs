#[cfg(test)]
mod supervisor_test;

use crate::{
    checkpoint::{lock_path, locking::LedgerLock, CheckpointError, CheckpointStore},
    collector::{self, Sweep},
    config::{ConfigErrors, SimulatorConfig},
    executors::{ExecutorError, LocalExecutor},
    ingest::RunContext,
    ledger::Summary,
    reconcile::{reconcile, ReconcileError, Reconciliation},
    worker::{ArchiveContext, WorkerContext},
};
use std::{
    env, fs,
    io::{self, Write},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Invalid sweep")]
    Config(#[from] ConfigErrors),
    #[error("Checkpoint failure")]
    Checkpoint(#[from] CheckpointError),
    #[error("Failed to resume from checkpoint")]
    Reconcile(#[from] ReconcileError),
    #[error("Unable to call the simulator for its help output. Is it in your PATH?")]
    Help(#[source] ExecutorError),
    #[error("Failed to start worker {id}")]
    Spawn {
        id: usize,
        #[source]
        source: io::Error,
    },
    #[error("Failed to hand the context to worker {id}")]
    Handoff {
        id: usize,
        #[source]
        source: io::Error,
    },
    #[error("Failed to serialize worker context")]
    Context(#[from] serde_yaml::Error),
    #[error("Failed to wait for worker {id}")]
    Wait {
        id: usize,
        #[source]
        source: io::Error,
    },
    #[error("{failed} of {total} workers exited with an error")]
    WorkersFailed { failed: usize, total: usize },
    #[error("Failed to remove archive {path:?}")]
    ArchiveCleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No checkpoint file at {0:?}, multiplanet must be running for this sweep")]
    NoCheckpoint(PathBuf),
}

/// Options of a single `run` invocation
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input_file: PathBuf,
    pub cores: NonZeroUsize,
    pub archive: bool,
    pub force: bool,
    pub config: Option<PathBuf>,
    /// tracing filter handed to the workers
    pub log_filter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// nothing was left to run, no worker was started
    AlreadyComplete(Summary),
    /// all workers ran out of work
    Finished(Summary),
}

fn remove_archive(path: &Path) -> Result<(), SweepError> {
    if path.is_file() {
        fs::remove_file(path).map_err(|source| SweepError::ArchiveCleanup {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = ?path, "Removed archive");
    }

    Ok(())
}

/// stop a worker that never got its context
fn reap(id: usize, child: &mut Child) {
    if let Err(error) = child.kill() {
        warn!(worker = id, error = ?error, "Failed to kill worker");
    }
    match child.wait() {
        Ok(status) => debug!(worker = id, status = ?status, "Reaped worker"),
        Err(error) => warn!(worker = id, error = ?error, "Failed to wait for worker"),
    }
}

/// start a worker process of the current executable and hand it its context
fn spawn_worker(context: &WorkerContext) -> Result<Child, SweepError> {
    let id = context.id;
    let exe_path = env::current_exe().map_err(|source| SweepError::Spawn { id, source })?;
    let payload = serde_yaml::to_string(context)?;

    let mut child = Command::new(exe_path)
        .arg("worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| SweepError::Spawn { id, source })?;

    // dropping stdin closes the pipe, the worker reads its context until end of input
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(source) = stdin.write_all(payload.as_bytes()) {
            drop(stdin);
            reap(id, &mut child);

            return Err(SweepError::Handoff { id, source });
        }
    }

    debug!(worker = id, pid = child.id(), "Started worker");

    Ok(child)
}

/// prepare the ledger, run `cores` workers until no simulation is pending and clean up
pub fn run(options: &RunOptions) -> Result<RunOutcome, SweepError> {
    let simulator = SimulatorConfig::load(options.config.as_deref())?;

    if options.archive && !cfg!(feature = "archive") {
        return Err(ConfigErrors::ArchiveUnsupported.into());
    }

    // everything below may write, discovery has to succeed first
    let sweep = Sweep::discover(&options.input_file)?;
    let checkpoint = sweep.checkpoint_path()?;
    let archive_path = sweep.archive_path()?;

    let store = CheckpointStore::new(&checkpoint, LedgerLock::create(lock_path(&checkpoint))?);

    if store.exists() {
        match reconcile(&store, &sweep, options.force)? {
            Reconciliation::AlreadyComplete(summary) => {
                return Ok(RunOutcome::AlreadyComplete(summary))
            }
            Reconciliation::Restarted(_) => remove_archive(&archive_path)?,
            Reconciliation::Resumed(summary) => {
                info!(
                    pending = summary.pending,
                    complete = summary.complete,
                    "Resuming sweep"
                )
            }
        }
    } else {
        store.initialize(&sweep.input_file, &sweep.simulations)?;
    }

    // fetched once here, workers never call the simulator for it
    let archive = if options.archive {
        let help = LocalExecutor::new(simulator.clone())
            .fetch_help()
            .map_err(SweepError::Help)?;

        Some(ArchiveContext {
            path: archive_path.clone(),
            run: RunContext {
                system_name: sweep.system_name.clone(),
                bodies: sweep.bodies.clone(),
                log_file: sweep.log_file(),
                in_files: sweep.in_files.clone(),
            },
            help,
        })
    } else {
        None
    };

    let total = options.cores.get();
    let mut workers = Vec::with_capacity(total);

    for id in 0..total {
        let context = WorkerContext {
            id,
            checkpoint: checkpoint.clone(),
            lock: store.lock().path().to_path_buf(),
            simulator: simulator.clone(),
            archive: archive.clone(),
            log_filter: options.log_filter.clone(),
        };

        match spawn_worker(&context) {
            Ok(child) => workers.push((id, child)),
            Err(e) => {
                // workers already running finish their claims before the error surfaces
                error!("Failed to start worker {id}: {e}");
                wait_all(workers)?;

                return Err(e);
            }
        }
    }

    info!(workers = total, "Started workers");

    let failed = wait_all(workers)?;

    if !options.archive {
        remove_archive(&archive_path)?;
    }

    if failed > 0 {
        return Err(SweepError::WorkersFailed { failed, total });
    }

    let summary = store.load()?.summary();
    info!(
        complete = summary.complete,
        total = summary.total(),
        "All workers finished"
    );

    Ok(RunOutcome::Finished(summary))
}

/// block until every worker exited, returns the number of workers that failed
fn wait_all(workers: Vec<(usize, Child)>) -> Result<usize, SweepError> {
    let mut failed = 0;

    for (id, mut child) in workers {
        let status = child
            .wait()
            .map_err(|source| SweepError::Wait { id, source })?;

        if status.success() {
            debug!(worker = id, "Worker finished");
        } else {
            warn!(worker = id, status = ?status, "Worker exited with an error");
            failed += 1;
        }
    }

    Ok(failed)
}

/// progress of a sweep as recorded in its checkpoint file
pub fn status(input_file: &Path) -> Result<Summary, SweepError> {
    let (destination, _) = collector::read_sweep_file(input_file)?;
    let checkpoint = collector::checkpoint_path(&destination)?;

    let store = CheckpointStore::new(&checkpoint, LedgerLock::new(lock_path(&checkpoint)));
    if !store.exists() {
        return Err(SweepError::NoCheckpoint(checkpoint));
    }

    Ok(store.load()?.summary())
}
