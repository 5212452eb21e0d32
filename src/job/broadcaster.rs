//! Fan-out of a job's output to any number of readers.
//!
//! One lock guards the log store, the subscriber set and the closed flag.
//! `append` and `subscribe` both run under it, so a subscriber either sees a
//! given append in its snapshot or receives it live, never both and never
//! neither.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs::File;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::error::{ExecError, Result};
use crate::job::log_store::{LogSnapshot, LogStore};

#[derive(Debug)]
pub struct Broadcaster {
    job_id: Uuid,
    capacity: usize,
    block_size: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    store: LogStore,
    subscribers: Vec<Subscriber>,
    closed: bool,
}

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<Bytes>,
    lagged: Arc<AtomicBool>,
}

impl Broadcaster {
    /// `capacity` bounds the number of undelivered live blocks per subscriber;
    /// `block_size` is the granularity of historical replay.
    pub fn new(job_id: Uuid, store: LogStore, capacity: usize, block_size: usize) -> Self {
        Self {
            job_id,
            capacity: capacity.max(1),
            block_size: block_size.max(1),
            inner: Mutex::new(Inner {
                store,
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Deliver `bytes` to every attached subscriber and append them to the log.
    ///
    /// Delivery never waits: a subscriber whose queue is full is evicted and
    /// one whose receiver was dropped is removed. Persistence errors are
    /// returned before anything is delivered.
    pub async fn append(&self, bytes: Bytes) -> Result<()> {
        let job_id = self.job_id;
        let mut inner = self.inner.lock().await;

        inner.store.append(&bytes).await?;

        inner
            .subscribers
            .retain(|sub| match sub.tx.try_send(bytes.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    sub.lagged.store(true, Ordering::Release);
                    tracing::warn!(job_id = %job_id, "Evicting subscriber that fell behind");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(job_id = %job_id, "Removing disconnected subscriber");
                    false
                }
            });
        Ok(())
    }

    /// Attach a new reader.
    ///
    /// The returned subscription replays everything appended so far and then
    /// follows live output. On a closed broadcaster it replays history and
    /// ends.
    pub async fn subscribe(&self) -> Subscription {
        let mut inner = self.inner.lock().await;
        let snapshot = inner.store.snapshot();

        let live = if inner.closed {
            None
        } else {
            let (tx, rx) = mpsc::channel(self.capacity);
            let lagged = Arc::new(AtomicBool::new(false));
            inner.subscribers.push(Subscriber {
                tx,
                lagged: lagged.clone(),
            });
            Some(LiveFeed { rx, lagged })
        };

        tracing::debug!(
            job_id = %self.job_id,
            chunks = snapshot.chunks.len(),
            tail_bytes = snapshot.tail.len(),
            live = live.is_some(),
            "Subscriber attached"
        );

        Subscription::new(snapshot, live, self.block_size)
    }

    /// End every live feed and refuse new ones. Idempotent.
    pub async fn close_all_subscribers(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    pub async fn snapshot(&self) -> LogSnapshot {
        self.inner.lock().await.store.snapshot()
    }
}

struct LiveFeed {
    rx: mpsc::Receiver<Bytes>,
    lagged: Arc<AtomicBool>,
}

/// A reader's view of a job log: sealed chunks, then the tail captured at
/// attach time, then live output until the broadcaster closes.
pub struct Subscription {
    chunks: VecDeque<PathBuf>,
    reader: Option<ReaderStream<File>>,
    tail: Bytes,
    live: Option<LiveFeed>,
    block_size: usize,
}

impl Subscription {
    fn new(snapshot: LogSnapshot, live: Option<LiveFeed>, block_size: usize) -> Self {
        Self {
            chunks: snapshot.chunks.into(),
            reader: None,
            tail: snapshot.tail,
            live,
            block_size,
        }
    }

    /// Next block of output. `None` marks the end of the stream.
    ///
    /// A replay read failure or an eviction for falling behind is reported
    /// once as an error, after which the subscription is exhausted.
    pub async fn next(&mut self) -> Option<Result<Bytes>> {
        loop {
            if let Some(reader) = self.reader.as_mut() {
                match reader.next().await {
                    Some(Ok(bytes)) => return Some(Ok(bytes)),
                    Some(Err(e)) => {
                        self.abandon();
                        return Some(Err(ExecError::Io(e)));
                    }
                    None => self.reader = None,
                }
                continue;
            }

            if let Some(path) = self.chunks.pop_front() {
                match File::open(&path).await {
                    Ok(file) => {
                        self.reader = Some(ReaderStream::with_capacity(file, self.block_size));
                    }
                    Err(e) => {
                        self.abandon();
                        return Some(Err(ExecError::Io(e)));
                    }
                }
                continue;
            }

            if !self.tail.is_empty() {
                let n = self.block_size.min(self.tail.len());
                return Some(Ok(self.tail.split_to(n)));
            }

            let live = self.live.as_mut()?;
            match live.rx.recv().await {
                Some(bytes) => return Some(Ok(bytes)),
                None => {
                    let lagged = live.lagged.load(Ordering::Acquire);
                    self.live = None;
                    if lagged {
                        return Some(Err(ExecError::SubscriberLagged));
                    }
                    return None;
                }
            }
        }
    }

    /// Drain the subscription to completion. Intended for callers that know
    /// the job is finished or will be.
    pub async fn collect(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(block) = self.next().await {
            out.extend_from_slice(&block?);
        }
        Ok(out)
    }

    fn abandon(&mut self) {
        self.chunks.clear();
        self.reader = None;
        self.tail = Bytes::new();
        self.live = None;
    }
}
