use super::{Executor, ExecutorError, RunOutput, SimulatorHelp};
use crate::config::SimulatorConfig;
use std::{
    io::Read,
    path::Path,
    process::{Child, Command, Stdio},
    thread,
    time::Instant,
};
use tracing::{debug, instrument, trace, warn};
use wait_timeout::ChildExt;

/// Executor that runs the simulator as a local child process
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    config: SimulatorConfig,
}

fn drain(source: Option<impl Read>) -> String {
    let mut buffer = Vec::new();

    if let Some(mut source) = source {
        if let Err(e) = source.read_to_end(&mut buffer) {
            warn!("Failed to read simulator output: {e}");
        }
    }

    String::from_utf8_lossy(&buffer).into_owned()
}

impl LocalExecutor {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }

    fn spawn(&self, args: &[String], cwd: Option<&Path>) -> Result<Child, ExecutorError> {
        let mut command = Command::new(&self.config.exec);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        command.spawn().map_err(|source| ExecutorError::Spawn {
            exec: self.config.exec.clone(),
            source,
        })
    }

    /// wait for the child while both pipes are drained, so a chatty simulator can't block on a
    /// full pipe
    fn collect(&self, mut child: Child) -> Result<RunOutput, ExecutorError> {
        let start = Instant::now();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        thread::scope(|scope| -> Result<RunOutput, ExecutorError> {
            let stdout = scope.spawn(|| drain(stdout));
            let stderr = scope.spawn(|| drain(stderr));

            let (status, timed_out) = match self.config.timeout() {
                Some(timeout) => match child.wait_timeout(timeout)? {
                    Some(status) => (status, false),
                    None => {
                        // child hasn't exited yet
                        warn!(pid = child.id(), "Simulator ran into timeout, killing it");
                        child.kill()?;
                        (child.wait()?, true)
                    }
                },
                None => (child.wait()?, false),
            };

            Ok(RunOutput {
                runtime: start.elapsed(),
                stdout: stdout.join().unwrap_or_default(),
                stderr: stderr.join().unwrap_or_default(),
                status: status.code(),
                timed_out,
            })
        })
    }

    /// run the simulator once with the help arguments and capture what it prints
    pub fn fetch_help(&self) -> Result<SimulatorHelp, ExecutorError> {
        let child = self.spawn(&self.config.help_params, None)?;
        let output = self.collect(child)?;

        if !output.success() {
            return Err(ExecutorError::HelpFailed(output.status));
        }

        debug!(bytes = output.stdout.len(), "Fetched simulator help");

        Ok(SimulatorHelp {
            text: output.stdout,
        })
    }
}

impl Executor for LocalExecutor {
    #[instrument(skip(self), level = "debug")]
    fn execute(&self, simulation: &Path) -> Result<RunOutput, ExecutorError> {
        let child = self.spawn(&self.config.params, Some(simulation))?;
        let output = self.collect(child)?;

        debug!(
            "Finished in {} ms | status: {:?}",
            output.runtime.as_millis(),
            output.status
        );
        trace!("Output: {}", output.stdout);

        Ok(output)
    }
}
