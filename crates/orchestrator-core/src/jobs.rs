//! Generic async job store backing the ingestion and query job
//! endpoints: create a pending record, transition it to running,
//! complete or fail it, and evict records past a TTL on every
//! `create()` call rather than on a background sweep.

use crate::model::{JobRecord, JobStatus};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct JobStore<T> {
    jobs: DashMap<Uuid, JobRecord<T>>,
    ttl: Duration,
}

impl<T: Clone> JobStore<T> {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { jobs: DashMap::new(), ttl }
    }

    /// Creates a new pending job, sweeping expired records first.
    #[must_use]
    pub fn create(&self) -> Uuid {
        self.evict_expired();
        let record = JobRecord::<T>::new();
        let id = record.job_id;
        self.jobs.insert(id, record);
        id
    }

    fn evict_expired(&self) {
        let now = chrono::Utc::now();
        self.jobs.retain(|_, record| {
            let age = now - record.created_at;
            age.to_std().map(|d| d < self.ttl).unwrap_or(true)
        });
    }

    pub fn mark_running(&self, job_id: Uuid) {
        if let Some(mut record) = self.jobs.get_mut(&job_id) {
            record.status = JobStatus::Running;
        }
    }

    pub fn complete(&self, job_id: Uuid, result: T) {
        if let Some(mut record) = self.jobs.get_mut(&job_id) {
            record.status = JobStatus::Completed;
            record.result = Some(result);
            record.completed_at = Some(chrono::Utc::now());
        }
    }

    pub fn fail(&self, job_id: Uuid, error: impl Into<String>) {
        if let Some(mut record) = self.jobs.get_mut(&job_id) {
            record.status = JobStatus::Failed;
            record.error = Some(error.into());
            record.completed_at = Some(chrono::Utc::now());
        }
    }

    #[must_use]
    pub fn get(&self, job_id: Uuid) -> Option<JobRecord<T>> {
        self.jobs.get(&job_id).map(|r| r.clone())
    }
}

pub type SharedJobStore<T> = Arc<JobStore<T>>;
