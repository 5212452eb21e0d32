//! Jobs and their output.
//!
//! - [`Job`]: identity, status and the single owner of a [`Broadcaster`]
//! - [`Broadcaster`]: fans output out to live readers and the [`LogStore`]
//! - [`LogStore`]: in-memory tail plus sealed on-disk chunks
//! - [`ProcessHandle`]: kill requests routed to the task owning the child
//!
//! Status lives in a watch channel so reads never wait on the broadcaster
//! lock. Finishing a job is two ordered steps, both in [`Job::finish`]:
//!
//! 1. the status flips from `Running` to a terminal state, at most once
//! 2. the broadcaster closes, ending every reader's stream
//!
//! A reader whose stream has ended always sees a terminal status. A status
//! read between the two steps may report a terminal status while a reader is
//! still draining its last live blocks.

pub mod broadcaster;
pub mod log_store;
pub mod process;
pub mod state;

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

pub use broadcaster::{Broadcaster, Subscription};
pub use log_store::{LogSnapshot, LogStore};
pub use process::ProcessHandle;
pub use state::JobStatus;

use crate::config::LogConfig;

#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub command: String,
    pub args: Vec<String>,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    status: watch::Sender<JobStatus>,
    exit_code: OnceLock<Option<i32>>,
    broadcaster: Broadcaster,
    process: OnceLock<ProcessHandle>,
}

impl Job {
    /// A new job in `Running` status with no process attached yet.
    pub fn new(command: String, args: Vec<String>, owner: String, log: &LogConfig) -> Self {
        let id = Uuid::new_v4();
        let store = LogStore::new(id, &log.dir, log.chunk_threshold);
        let (status, _) = watch::channel(JobStatus::Running);

        Self {
            id,
            command,
            args,
            owner,
            created_at: Utc::now(),
            status,
            exit_code: OnceLock::new(),
            broadcaster: Broadcaster::new(
                id,
                store,
                log.subscriber_capacity,
                log.read_block_size,
            ),
            process: OnceLock::new(),
        }
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.get().copied().flatten()
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn process(&self) -> Option<&ProcessHandle> {
        self.process.get()
    }

    /// Move from `Running` to a terminal status, then close all readers.
    /// Returns false, and closes nothing, if the job had already finished.
    pub async fn finish(&self, next: JobStatus) -> bool {
        let changed = self.status.send_if_modified(|status| status.transition(next));
        if changed {
            tracing::info!(job_id = %self.id, status = %next, "Job finished");
            self.broadcaster.close_all_subscribers().await;
        }
        changed
    }

    pub(crate) fn attach_process(&self, handle: ProcessHandle) {
        if self.process.set(handle).is_err() {
            tracing::warn!(job_id = %self.id, "Process already attached, ignoring");
        }
    }

    pub(crate) fn record_exit(&self, code: Option<i32>) {
        let _ = self.exit_code.set(code);
    }
}
