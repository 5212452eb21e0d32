use serde::{Deserialize, Serialize};

/// Lifecycle of a job. `Running` is the only non-terminal state; every
/// transition leaves it and none return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Completed,
    Errored,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    /// Apply a transition in place. Returns false, leaving `self` untouched,
    /// when the job already left `Running` or `next` is not terminal.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if self.is_terminal() || !next.is_terminal() {
            return false;
        }
        *self = next;
        true
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Errored => write!(f, "errored"),
            JobStatus::Stopped => write!(f, "stopped"),
        }
    }
}
