//! Import job lifecycle and progress tracking
//!
//! The background task owns a `JobHandle` and counts rows in memory; the
//! counters reach the job store every `PROGRESS_FLUSH_INTERVAL` rows and on
//! every terminal transition. Pollers only ever read the stored snapshot.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::store::{JobStore, StoreError};
use crate::types::{ImportJob, ImportJobStatus};

/// Processed rows between two progress writes
pub const PROGRESS_FLUSH_INTERVAL: u32 = 100;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Job not found with id: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Entry point for creating, reading and mutating import jobs
#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn JobStore>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Persist a fresh `PROCESSING` job and hand its writer handle out
    pub async fn create(&self, job_id: &str) -> Result<JobHandle, TrackerError> {
        let job = ImportJob::new(job_id);
        self.store.create_job(&job).await?;
        info!("Import job {} created", job_id);
        Ok(JobHandle {
            tracker: self.clone(),
            job,
        })
    }

    pub async fn get(&self, job_id: &str) -> Result<ImportJob, TrackerError> {
        self.store
            .find_job(job_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(job_id.to_string()))
    }

    /// Load, mutate and store a job; returns the stored snapshot
    pub async fn update<F>(&self, job_id: &str, mutator: F) -> Result<ImportJob, TrackerError>
    where
        F: FnOnce(&mut ImportJob) + Send,
    {
        let mut job = self.get(job_id).await?;
        mutator(&mut job);
        job.updated_at = Utc::now();

        if !job.is_consistent() {
            warn!(
                "Import job {} counters out of balance: {}+{} vs {} of {}",
                job_id, job.success_records, job.failed_records, job.processed_records, job.total_records
            );
        }

        self.store.update_job(&job).await?;
        Ok(job)
    }
}

/// Single-writer handle to a running job
pub struct JobHandle {
    tracker: JobTracker,
    job: ImportJob,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job.job_id
    }

    /// In-memory view, possibly ahead of the stored one
    #[cfg(test)]
    pub fn snapshot(&self) -> &ImportJob {
        &self.job
    }

    /// Record the number of rows to process and persist it
    pub async fn start(&mut self, total_records: u32) -> Result<(), TrackerError> {
        self.job.total_records = total_records;
        self.persist().await
    }

    pub async fn record_success(&mut self) -> Result<(), TrackerError> {
        self.job.success_records += 1;
        self.advance().await
    }

    pub async fn record_failure(&mut self) -> Result<(), TrackerError> {
        self.job.failed_records += 1;
        self.advance().await
    }

    async fn advance(&mut self) -> Result<(), TrackerError> {
        self.job.processed_records += 1;
        if self.job.processed_records % PROGRESS_FLUSH_INTERVAL == 0 {
            debug!(
                "Import job {} progress: {}/{}",
                self.job.job_id, self.job.processed_records, self.job.total_records
            );
            self.persist().await?;
        }
        Ok(())
    }

    pub async fn complete(mut self) -> Result<ImportJob, TrackerError> {
        self.job.status = ImportJobStatus::Completed;
        self.persist().await?;
        Ok(self.job)
    }

    pub async fn fail(mut self, message: impl Into<String>) -> Result<ImportJob, TrackerError> {
        self.job.status = ImportJobStatus::Failed;
        self.job.error_message = Some(message.into());
        self.persist().await?;
        Ok(self.job)
    }

    async fn persist(&mut self) -> Result<(), TrackerError> {
        let job_id = self.job.job_id.clone();
        let current = self.job.clone();
        let stored = self
            .tracker
            .update(&job_id, move |job| {
                job.status = current.status;
                job.total_records = current.total_records;
                job.processed_records = current.processed_records;
                job.success_records = current.success_records;
                job.failed_records = current.failed_records;
                job.error_message = current.error_message;
            })
            .await?;
        self.job.updated_at = stored.updated_at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::InMemoryJobStore;
    use tokio_test::assert_ok;

    fn tracker() -> (Arc<InMemoryJobStore>, JobTracker) {
        let store = Arc::new(InMemoryJobStore::new());
        let tracker = JobTracker::new(store.clone());
        (store, tracker)
    }

    #[tokio::test]
    async fn test_create_persists_processing_job() {
        let (_, tracker) = tracker();
        let handle = tracker.create("job-1").await.unwrap();
        assert_eq!(handle.job_id(), "job-1");

        let stored = tracker.get("job-1").await.unwrap();
        assert_eq!(stored.status, ImportJobStatus::Processing);
        assert_eq!(stored.processed_records, 0);
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_not_found() {
        let (_, tracker) = tracker();
        let result = tracker.get("missing").await;
        assert!(matches!(result, Err(TrackerError::NotFound(id)) if id == "missing"));
    }

    #[tokio::test]
    async fn test_update_unknown_job_is_not_found() {
        let (_, tracker) = tracker();
        let result = tracker.update("missing", |job| job.total_records = 5).await;
        assert!(matches!(result, Err(TrackerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_progress_is_persisted_every_hundred_rows() {
        let (store, tracker) = tracker();
        let mut handle = tracker.create("job-1").await.unwrap();
        assert_ok!(handle.start(250).await);
        assert_eq!(store.update_count(), 1);

        for i in 0..150 {
            if i % 3 == 0 {
                handle.record_failure().await.unwrap();
            } else {
                handle.record_success().await.unwrap();
            }
        }

        // One write for the total, one at row 100
        assert_eq!(store.update_count(), 2);
        let stored = tracker.get("job-1").await.unwrap();
        assert_eq!(stored.processed_records, 100);
        assert!(stored.is_consistent());

        let in_memory = handle.snapshot().clone();
        assert_eq!(in_memory.processed_records, 150);
        assert_eq!(in_memory.success_records + in_memory.failed_records, 150);
    }

    #[tokio::test]
    async fn test_complete_writes_final_counters() {
        let (_, tracker) = tracker();
        let mut handle = tracker.create("job-1").await.unwrap();
        handle.start(3).await.unwrap();
        handle.record_success().await.unwrap();
        handle.record_failure().await.unwrap();
        handle.record_failure().await.unwrap();

        let finished = handle.complete().await.unwrap();
        assert_eq!(finished.status, ImportJobStatus::Completed);

        let stored = tracker.get("job-1").await.unwrap();
        assert_eq!(stored.status, ImportJobStatus::Completed);
        assert_eq!(stored.total_records, 3);
        assert_eq!(stored.success_records, 1);
        assert_eq!(stored.failed_records, 2);
        assert_eq!(stored.status_message(), "Processing completed successfully");
    }

    #[tokio::test]
    async fn test_failed_job_is_terminal() {
        let (_, tracker) = tracker();
        let handle = tracker.create("job-1").await.unwrap();
        handle.fail("Unable to read spreadsheet").await.unwrap();

        let stored = tracker.get("job-1").await.unwrap();
        assert_eq!(stored.status, ImportJobStatus::Failed);
        assert_eq!(stored.status_message(), "Processing failed: Unable to read spreadsheet");

        let result = tracker.update("job-1", |job| job.status = ImportJobStatus::Completed).await;
        assert!(matches!(result, Err(TrackerError::Store(StoreError::Conflict(_)))));
    }
}
