use std::io;

use tokio::sync::{mpsc, oneshot};

/// Requests served by the task that owns a job's child process.
#[derive(Debug)]
pub(crate) enum ProcessControl {
    /// Kill the process. The reply carries whether the job moved to
    /// `Stopped` as a result.
    Kill { reply: oneshot::Sender<io::Result<bool>> },
}

/// A job's only route to its OS process.
///
/// The child itself lives inside the reaper task; this handle can ask that
/// task to deliver a kill. Once the process has been reaped the task is gone
/// and requests fail instead of touching a stale pid.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    control: mpsc::Sender<ProcessControl>,
}

impl ProcessHandle {
    pub(crate) fn new(pid: Option<u32>, control: mpsc::Sender<ProcessControl>) -> Self {
        Self { pid, control }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True until the reaper has collected the exit status.
    pub fn is_alive(&self) -> bool {
        !self.control.is_closed()
    }

    pub(crate) async fn kill(&self) -> io::Result<bool> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(ProcessControl::Kill { reply })
            .await
            .map_err(|_| already_reaped())?;
        response.await.map_err(|_| already_reaped())?
    }
}

fn already_reaped() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "process has already exited")
}
