mod archive;
mod checkpoint;
mod collector;
mod config;
mod executors;
mod ingest;
mod ledger;
mod reconcile;
mod supervisor;
mod worker;

use clap::{Parser, Subcommand};
use std::{
    error::Error,
    io::{self, Read},
    num::NonZeroUsize,
    path::PathBuf,
    process::ExitCode,
    thread,
};
use supervisor::{RunOptions, RunOutcome};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use worker::WorkerContext;

/// Run a parameter sweep of simulations on all cores of a machine, resumable after interruption
#[derive(Parser, Debug)]
#[command(name = "multiplanet", author, version, about, long_about = None)]
struct Cli {
    /// Only report errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Report every claim and state transition
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every pending simulation of a sweep
    Run {
        /// Sweep input file the simulation folders were generated from
        input_file: PathBuf,

        /// Number of worker processes
        #[arg(short, long, default_value_t = default_cores())]
        cores: NonZeroUsize,

        /// Archive the results of every finished simulation
        #[arg(short = 'b', long = "bigplanet", alias = "archive")]
        archive: bool,

        /// Start over if every simulation has already run
        #[arg(short, long)]
        force: bool,

        /// YAML file describing how the simulator is called
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the progress of a running or finished sweep
    Status {
        /// Sweep input file the simulation folders were generated from
        input_file: PathBuf,
    },
    /// Work loop of a single worker process, reads its context from stdin
    #[command(hide = true)]
    Worker,
}

fn default_cores() -> NonZeroUsize {
    thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

/// message of an error followed by all of its sources
pub fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();

    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }

    message
}

/// `RUST_LOG` takes precedence over the filter derived from the command line
fn init_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn log_filter(cli: &Cli) -> &'static str {
    match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, true) => "debug",
        _ => "info",
    }
}

fn read_context() -> Result<WorkerContext, Box<dyn Error>> {
    let mut payload = String::new();
    io::stdin().read_to_string(&mut payload)?;

    Ok(serde_yaml::from_str(&payload)?)
}

fn run_worker(fallback_filter: &str) -> ExitCode {
    let context = match read_context() {
        Ok(context) => context,
        Err(e) => {
            init_logging(fallback_filter);
            error!("Failed to read worker context: {}", error_chain(e.as_ref()));
            return ExitCode::FAILURE;
        }
    };

    init_logging(&context.log_filter);
    let id = context.id;

    match worker::run_process(context) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(worker = id, "{}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = log_filter(&cli);

    match cli.command {
        Command::Worker => run_worker(filter),
        Command::Run {
            input_file,
            cores,
            archive,
            force,
            config,
        } => {
            init_logging(filter);

            let options = RunOptions {
                input_file,
                cores,
                archive,
                force,
                config,
                log_filter: filter.to_string(),
            };

            match supervisor::run(&options) {
                Ok(RunOutcome::AlreadyComplete(summary)) => {
                    info!(complete = summary.complete, "All simulations have been ran");
                    ExitCode::SUCCESS
                }
                Ok(RunOutcome::Finished(summary)) => {
                    info!(complete = summary.complete, "Sweep finished");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("{}", error_chain(&e));
                    ExitCode::FAILURE
                }
            }
        }
        Command::Status { input_file } => {
            init_logging(filter);

            match supervisor::status(&input_file) {
                Ok(summary) => {
                    println!("{summary}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("{}", error_chain(&e));
                    ExitCode::FAILURE
                }
            }
        }
    }
}
