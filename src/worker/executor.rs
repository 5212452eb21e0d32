use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use bytes::Bytes;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{Stream, StreamExt};
use tokio_util::io::ReaderStream;

use crate::config::LogConfig;
use crate::error::{ExecError, Result};
use crate::job::process::ProcessControl;
use crate::job::{Job, JobStatus, ProcessHandle};

/// Spawns job processes and drives their lifecycle.
///
/// Each started job gets two tasks:
/// - a pump that drains stdout and stderr into the job's broadcaster
/// - a reaper that owns the child, serves kill requests and waits for exit
#[derive(Debug, Clone)]
pub struct JobExecutor {
    config: LogConfig,
}

impl JobExecutor {
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.config
    }

    /// Start `command` with `args` on behalf of `owner`.
    ///
    /// Returns once the process is running. A spawn failure is returned
    /// directly and no job is created.
    pub fn run(&self, command: &str, args: &[String], owner: &str) -> Result<Arc<Job>> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                tracing::error!(command, error = %source, "Failed to start process");
                ExecError::SpawnFailed {
                    command: command.to_string(),
                    source,
                }
            })?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                let _ = child.start_kill();
                return Err(ExecError::SpawnFailed {
                    command: command.to_string(),
                    source: io::Error::other("process output was not captured"),
                });
            }
        };

        let job = Arc::new(Job::new(
            command.to_string(),
            args.to_vec(),
            owner.to_string(),
            &self.config,
        ));

        let (control_tx, control_rx) = mpsc::channel(4);
        job.attach_process(ProcessHandle::new(child.id(), control_tx));

        tracing::info!(
            job_id = %job.id,
            command,
            args = ?args,
            pid = ?child.id(),
            owner,
            "Job started"
        );

        let block_size = self.config.read_block_size.max(1);
        let output = ReaderStream::with_capacity(stdout, block_size)
            .merge(ReaderStream::with_capacity(stderr, block_size));

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(reap(job.clone(), child, control_rx, exit_tx));
        tokio::spawn(pump(job.clone(), output, exit_rx));

        Ok(job)
    }

    /// Kill a running job's process and mark it `Stopped`.
    pub async fn stop(&self, job: &Job) -> Result<()> {
        let status = job.status();
        if status.is_terminal() {
            return Err(ExecError::AlreadyTerminal(status));
        }

        let process = job.process().ok_or(ExecError::NoProcess)?;
        match process.kill().await {
            Ok(true) => {
                tracing::info!(job_id = %job.id, pid = ?process.pid(), "Job stopped");
                Ok(())
            }
            Ok(false) => Err(ExecError::AlreadyTerminal(job.status())),
            Err(e) => {
                let status = job.status();
                if status.is_terminal() {
                    return Err(ExecError::AlreadyTerminal(status));
                }
                // Reaped but output still draining
                if e.kind() == io::ErrorKind::NotFound {
                    return Err(ExecError::NoProcess);
                }
                tracing::warn!(job_id = %job.id, error = %e, "Failed to signal process");
                Err(ExecError::Io(e))
            }
        }
    }
}

/// Copy process output into the job log until both pipes reach end of
/// stream, then wait for the exit status and complete the job.
async fn pump<S>(job: Arc<Job>, output: S, exit: oneshot::Receiver<io::Result<ExitStatus>>)
where
    S: Stream<Item = io::Result<Bytes>>,
{
    tokio::pin!(output);

    while let Some(read) = output.next().await {
        let result = match read {
            Ok(bytes) if bytes.is_empty() => continue,
            Ok(bytes) => job.broadcaster().append(bytes).await,
            Err(e) => Err(ExecError::Io(e)),
        };
        if let Err(e) = result {
            fail(&job, e).await;
            return;
        }
    }

    match exit.await {
        Ok(Ok(status)) => {
            tracing::debug!(job_id = %job.id, exit_status = %status, "Output drained");
        }
        Ok(Err(e)) => {
            tracing::warn!(job_id = %job.id, error = %e, "Exit status unavailable");
        }
        Err(_) => {
            tracing::warn!(job_id = %job.id, "Reaper ended without reporting exit");
        }
    }

    job.finish(JobStatus::Completed).await;
}

/// Mark the job `Errored` and kill its process. A kill failure is logged only.
async fn fail(job: &Job, error: ExecError) {
    tracing::error!(job_id = %job.id, error = %error, "Output capture failed");
    job.finish(JobStatus::Errored).await;

    if let Some(process) = job.process() {
        if let Err(e) = process.kill().await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to kill process after error");
        }
    }
}

/// Own the child until it exits. Kill requests that succeed stop the job.
async fn reap(
    job: Arc<Job>,
    mut child: Child,
    mut control: mpsc::Receiver<ProcessControl>,
    exit: oneshot::Sender<io::Result<ExitStatus>>,
) {
    let result = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(request) = control.recv() => match request {
                ProcessControl::Kill { reply } => {
                    let outcome = match child.start_kill() {
                        Ok(()) => Ok(job.finish(JobStatus::Stopped).await),
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(outcome);
                }
            },
        }
    };

    // Refuse further kill requests before reporting the exit
    control.close();

    match &result {
        Ok(status) => {
            job.record_exit(status.code());
            tracing::info!(job_id = %job.id, exit_code = ?status.code(), "Process exited");
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "Failed to wait for process");
        }
    }

    let _ = exit.send(result);
}
