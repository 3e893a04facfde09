
use crate::{
    archive::{Archive, ArchiveError},
    checkpoint::{locking::LedgerLock, CheckpointError, CheckpointStore},
    config::{ConfigErrors, SimulatorConfig},
    error_chain,
    executors::{Executor, ExecutorError, LocalExecutor, RunOutput, SimulatorHelp},
    ingest::RunContext,
};
use serde::{Deserialize, Serialize};
use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Checkpoint operation failed")]
    Checkpoint(#[from] CheckpointError),
    #[error("Simulator could not be started")]
    Executor(#[from] ExecutorError),
    #[error("Worker setup failed")]
    Config(#[from] ConfigErrors),
}

/// Everything a worker process needs, handed over by the supervisor on the worker's stdin
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkerContext {
    pub id: usize,
    pub checkpoint: PathBuf,
    pub lock: PathBuf,
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub archive: Option<ArchiveContext>,
    /// tracing filter directive the supervisor runs with
    pub log_filter: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ArchiveContext {
    pub path: PathBuf,
    pub run: RunContext,
    pub help: SimulatorHelp,
}

/// Archive access of a worker, borrowed for the lifetime of the loop
pub struct Archival<'a> {
    pub archive: &'a dyn Archive,
    pub run: &'a RunContext,
    pub help: &'a SimulatorHelp,
}

/// Counts of what a worker did before it ran out of work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub completed: usize,
    pub failed: usize,
}

pub struct Worker<'a, E: Executor> {
    id: usize,
    store: CheckpointStore,
    executor: E,
    log: String,
    archival: Option<Archival<'a>>,
}

impl<'a, E: Executor> Worker<'a, E> {
    pub fn new(id: usize, store: CheckpointStore, executor: E, log: impl Into<String>) -> Self {
        Self {
            id,
            store,
            executor,
            log: log.into(),
            archival: None,
        }
    }

    pub fn with_archival(mut self, archival: Archival<'a>) -> Self {
        self.archival = Some(archival);
        self
    }

    /// claim, run and report simulations until none are pending
    #[instrument(skip(self), fields(worker = self.id), level = "info")]
    pub fn run(&self) -> Result<WorkerReport, WorkerError> {
        let mut report = WorkerReport::default();

        while let Some(simulation) = self.store.claim_next()? {
            info!(simulation = ?simulation, "Processing");

            let output = match self.executor.execute(&simulation) {
                Ok(output) => output,
                Err(error) => {
                    // the simulator can't be started at all, every further claim would fail the
                    // same way
                    self.store.report_failed(&simulation)?;

                    return Err(error.into());
                }
            };

            self.append_log(&simulation, &output_log(&output));

            if output.success() {
                if let Some(archival) = self.archival.as_ref() {
                    if let Err(error) = self.archive(archival, &simulation) {
                        let message = error_chain(&error);
                        warn!(simulation = ?simulation, "Archive failed: {message}");
                        self.append_log(&simulation, &format!("\nArchive Error: {message}\n"));
                    }
                }

                self.store.report_complete(&simulation)?;
                report.completed += 1;
                info!(simulation = ?simulation, "Completed");
            } else {
                self.store.report_failed(&simulation)?;
                report.failed += 1;
                warn!(
                    simulation = ?simulation,
                    status = ?output.status,
                    timed_out = output.timed_out,
                    "Failed, handed back for another attempt"
                );
            }
        }

        info!(
            completed = report.completed,
            failed = report.failed,
            "No pending simulations left"
        );

        Ok(report)
    }

    /// gather outside of the lock, write under it
    fn archive(&self, archival: &Archival<'_>, simulation: &Path) -> Result<bool, ArchiveError> {
        let entry = archival.run.gather(simulation)?;

        self.store
            .exclusive(|| archival.archive.store(&entry, archival.help))?
    }

    /// append to the per-simulation log, so retries keep the history of earlier attempts
    fn append_log(&self, simulation: &Path, content: &str) {
        let path = simulation.join(&self.log);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(content.as_bytes()));

        match result {
            Ok(()) => debug!(path = ?path, "Appended to simulation log"),
            Err(error) => warn!(error = ?error, path = ?path, "Failed to write simulation log"),
        }
    }
}

fn output_log(output: &RunOutput) -> String {
    let mut log = String::with_capacity(output.stderr.len() + output.stdout.len());
    log.push_str(&output.stderr);
    log.push_str(&output.stdout);

    if output.timed_out {
        log.push_str(&format!(
            "\nSimulation timed out after {} s and was killed\n",
            output.runtime.as_secs()
        ));
    }

    log
}

/// entry point of a worker process
pub fn run_process(context: WorkerContext) -> Result<WorkerReport, WorkerError> {
    debug!(context = ?context, "Starting worker");

    let store = CheckpointStore::new(&context.checkpoint, LedgerLock::new(&context.lock));
    let log = context.simulator.log.clone();
    let worker = Worker::new(
        context.id,
        store,
        LocalExecutor::new(context.simulator),
        log,
    );

    match context.archive {
        Some(ref archive) => run_archiving(worker, archive),
        None => worker.run(),
    }
}

#[cfg(feature = "archive")]
fn run_archiving<E: Executor>(
    worker: Worker<'_, E>,
    context: &ArchiveContext,
) -> Result<WorkerReport, WorkerError> {
    let archive = crate::archive::sqlite::SqliteArchive::new(&context.path);

    worker
        .with_archival(Archival {
            archive: &archive,
            run: &context.run,
            help: &context.help,
        })
        .run()
}

#[cfg(not(feature = "archive"))]
fn run_archiving<E: Executor>(
    _worker: Worker<'_, E>,
    _context: &ArchiveContext,
) -> Result<WorkerReport, WorkerError> {
    Err(ConfigErrors::ArchiveUnsupported.into())
}
