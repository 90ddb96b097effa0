//! Spreadsheet bulk import of customers
//!
//! `submit` validates the upload, creates the job record and returns at
//! once; a spawned task then decodes the file, drops duplicates, writes
//! customers in batches and keeps the job's counters current. Each upload
//! gets its own task and there is no limit on how many run at once.
//!
//! Row problems (missing fields, bad dates, duplicate NICs) are counted as
//! failed rows. Decode errors and failed batch writes end the job as FAILED.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::batch_writer::BatchWriter;
use super::file_decoder::{open_first_sheet, DecodeError};
use super::job_tracker::{JobHandle, JobTracker, TrackerError};
use super::row_parser::{parse_row, RowOutcome};
use super::store::{CustomerStore, JobStore, StoreError};
use crate::types::BulkUploadResponse;

/// Largest accepted upload (100 MiB)
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

const ACCEPTED_EXTENSIONS: [&str; 2] = [".xlsx", ".xls"];

/// Reasons an upload is refused before a job exists
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("File is empty")]
    Empty,
    #[error("File must be an Excel file (.xlsx or .xls)")]
    UnsupportedExtension,
    #[error("File size exceeds 100MB limit")]
    TooLarge,
}

/// Job-level failures of a running import
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error("Spreadsheet decoding was interrupted: {0}")]
    Interrupted(#[from] tokio::task::JoinError),
}

/// Check name and size of an upload
pub fn validate_upload(filename: &str, size: usize) -> Result<(), UploadError> {
    if size == 0 {
        return Err(UploadError::Empty);
    }

    let lower = filename.to_lowercase();
    if !ACCEPTED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return Err(UploadError::UnsupportedExtension);
    }

    if size > MAX_UPLOAD_BYTES {
        return Err(UploadError::TooLarge);
    }

    Ok(())
}

pub struct BulkImportService {
    customers: Arc<dyn CustomerStore>,
    tracker: JobTracker,
    batch_size: usize,
}

impl BulkImportService {
    pub fn new(customers: Arc<dyn CustomerStore>, jobs: Arc<dyn JobStore>, batch_size: usize) -> Self {
        Self {
            customers,
            tracker: JobTracker::new(jobs),
            batch_size,
        }
    }

    /// Accept an upload and start importing it in the background
    pub async fn submit(self: &Arc<Self>, payload: Vec<u8>, filename: &str) -> BulkUploadResponse {
        let job_id = Uuid::new_v4().to_string();

        if let Err(e) = validate_upload(filename, payload.len()) {
            warn!("Bulk upload '{}' refused: {}", filename, e);
            return BulkUploadResponse::rejected(job_id, e);
        }

        let handle = match self.tracker.create(&job_id).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to create import job for '{}': {}", filename, e);
                return BulkUploadResponse::rejected(job_id, e);
            }
        };

        info!(
            "Bulk upload '{}' accepted as job {} ({} bytes)",
            filename, job_id, payload.len()
        );

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.run(handle, payload).await;
        });

        BulkUploadResponse::accepted(job_id)
    }

    /// Current state of a job as seen by pollers
    pub async fn status(&self, job_id: &str) -> Result<BulkUploadResponse, TrackerError> {
        let job = self.tracker.get(job_id).await?;
        Ok(BulkUploadResponse::status_of(&job))
    }

    async fn run(&self, mut handle: JobHandle, payload: Vec<u8>) {
        let started = Instant::now();
        let job_id = handle.job_id().to_string();

        match self.ingest(&mut handle, payload).await {
            Ok(()) => match handle.complete().await {
                Ok(job) => info!(
                    "Import job {} completed in {}ms: {}/{} imported, {} failed",
                    job_id,
                    started.elapsed().as_millis(),
                    job.success_records,
                    job.total_records,
                    job.failed_records
                ),
                Err(e) => error!("Import job {} finished but could not be marked completed: {}", job_id, e),
            },
            Err(e) => {
                error!("Import job {} failed: {}", job_id, e);
                if let Err(persist_err) = handle.fail(e.to_string()).await {
                    error!("Import job {} could not be marked failed: {}", job_id, persist_err);
                }
            }
        }
    }

    async fn ingest(&self, handle: &mut JobHandle, payload: Vec<u8>) -> Result<(), ImportError> {
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<(usize, RowOutcome)>, DecodeError> {
            Ok(open_first_sheet(payload)?
                .map(|row| (row.row_number, parse_row(&row)))
                .collect())
        })
        .await??;

        handle.start(rows.len() as u32).await?;
        info!("Import job {}: {} data rows decoded", handle.job_id(), rows.len());

        let mut writer = BatchWriter::new(Arc::clone(&self.customers), self.batch_size);
        let mut accepted: HashSet<String> = HashSet::new();

        for (row_number, outcome) in rows {
            match outcome {
                RowOutcome::Parsed(record) => {
                    match self.is_duplicate(&record.nic_number, &accepted).await {
                        Ok(false) => {
                            accepted.insert(record.nic_number.clone());
                            writer.add(record).await?;
                            handle.record_success().await?;
                        }
                        Ok(true) => {
                            debug!("Row {}: NIC {} already exists, skipping", row_number, record.nic_number);
                            handle.record_failure().await?;
                        }
                        Err(e) => {
                            warn!("Row {}: duplicate check for NIC {} failed: {}", row_number, record.nic_number, e);
                            handle.record_failure().await?;
                        }
                    }
                }
                RowOutcome::Skipped(reason) => {
                    debug!("Row {} skipped: {}", row_number, reason);
                    handle.record_failure().await?;
                }
                RowOutcome::Rejected(reason) => {
                    warn!("Row {} rejected: {}", row_number, reason);
                    handle.record_failure().await?;
                }
            }
        }

        let written = writer.finish().await?;
        debug!("Import job {}: {} customers written", handle.job_id(), written);
        Ok(())
    }

    /// Seen earlier in this file, or already stored
    async fn is_duplicate(&self, nic_number: &str, accepted: &HashSet<String>) -> Result<bool, StoreError> {
        if accepted.contains(nic_number) {
            return Ok(true);
        }
        self.customers.exists_by_nic(nic_number).await
    }
}
