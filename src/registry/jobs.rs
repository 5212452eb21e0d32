use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::job::{Job, JobStatus};

/// Every job accepted since startup, keyed by id. Finished jobs are kept so
/// their status and output stay queryable.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<Uuid, Arc<Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: Arc<Job>) {
        self.jobs.insert(job.id, job);
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Job>> {
        self.jobs.get(id).cloned()
    }

    /// Jobs still in `Running` status, oldest first.
    pub fn running_jobs(&self) -> Vec<Arc<Job>> {
        let mut jobs: Vec<Arc<Job>> = self
            .jobs
            .values()
            .filter(|job| job.status() == JobStatus::Running)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
