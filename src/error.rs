use std::path::PathBuf;

use thiserror::Error;
use tonic::Status;
use uuid::Uuid;

use crate::job::JobStatus;
use crate::registry::Operation;
use crate::tls::TlsError;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Caller identity could not be established")]
    Unauthenticated,

    #[error("{identity} is not allowed to {operation}")]
    Unauthorized {
        identity: String,
        operation: Operation,
    },

    #[error("Failed to start {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to persist log chunk {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job is no longer running (status: {0})")]
    AlreadyTerminal(JobStatus),

    #[error("Job has no process attached")]
    NoProcess,

    #[error("Subscriber fell behind the live output and was dropped")]
    SubscriberLagged,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
}

pub type Result<T> = std::result::Result<T, ExecError>;

impl From<ExecError> for Status {
    fn from(err: ExecError) -> Self {
        let message = err.to_string();
        match err {
            ExecError::JobNotFound(_) => Status::not_found(message),
            ExecError::Unauthenticated => Status::unauthenticated(message),
            ExecError::Unauthorized { .. } => Status::permission_denied(message),
            ExecError::SpawnFailed { .. }
            | ExecError::AlreadyTerminal(_)
            | ExecError::NoProcess => Status::failed_precondition(message),
            ExecError::SubscriberLagged => Status::data_loss(message),
            ExecError::InvalidArgument(_) => Status::invalid_argument(message),
            ExecError::Persist { .. }
            | ExecError::Io(_)
            | ExecError::Transport(_)
            | ExecError::Tls(_) => Status::internal(message),
        }
    }
}
