//! Append-only output log for a single job.
//!
//! The log is an in-memory tail buffer in front of a sequence of sealed chunk
//! files named `<job_id>_<index>.log`. Concatenating chunk 0..n followed by
//! the tail always reproduces the job's output in production order.

use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{ExecError, Result};

#[derive(Debug)]
pub struct LogStore {
    job_id: Uuid,
    dir: PathBuf,
    threshold: usize,
    tail: BytesMut,
    chunks: usize,
}

/// Point-in-time view of a log: the sealed chunk files plus a copy of the tail.
#[derive(Debug, Clone, Default)]
pub struct LogSnapshot {
    pub chunks: Vec<PathBuf>,
    pub tail: Bytes,
}

impl LogStore {
    pub fn new(job_id: Uuid, dir: impl Into<PathBuf>, threshold: usize) -> Self {
        Self {
            job_id,
            dir: dir.into(),
            threshold,
            tail: BytesMut::new(),
            chunks: 0,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    pub fn tail(&self) -> &[u8] {
        &self.tail
    }

    pub fn chunk_path(&self, index: usize) -> PathBuf {
        chunk_path(&self.dir, self.job_id, index)
    }

    /// Append output to the log.
    ///
    /// A tail that already reached the threshold is sealed into the next chunk
    /// before `bytes` are added, so the tail never holds more than one read
    /// past the threshold. On a persistence error nothing is appended and the
    /// tail is left as it was.
    pub async fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if self.tail.len() >= self.threshold && !self.tail.is_empty() {
            self.seal().await?;
        }
        self.tail.extend_from_slice(bytes);
        Ok(())
    }

    /// Write the tail as a new immutable chunk and reset it.
    async fn seal(&mut self) -> Result<()> {
        let path = self.chunk_path(self.chunks);
        write_chunk(&self.dir, &path, &self.tail)
            .await
            .map_err(|source| ExecError::Persist {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(
            job_id = %self.job_id,
            chunk = self.chunks,
            bytes = self.tail.len(),
            "Sealed log chunk"
        );
        self.chunks += 1;
        self.tail.clear();
        Ok(())
    }

    pub fn snapshot(&self) -> LogSnapshot {
        LogSnapshot {
            chunks: (0..self.chunks).map(|i| self.chunk_path(i)).collect(),
            tail: Bytes::copy_from_slice(&self.tail),
        }
    }
}

pub fn chunk_path(dir: &Path, job_id: Uuid, index: usize) -> PathBuf {
    dir.join(format!("{}_{}.log", job_id, index))
}

async fn write_chunk(dir: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(contents).await?;
    file.sync_data().await
}
