//! Bulk import job types
//!
//! An `ImportJob` is the persisted record of one spreadsheet import run.
//! It is written by exactly one background task and read by any number of
//! status pollers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

// ==========================================================================
// Tests First (TDD)
// ==========================================================================


// ==========================================================================
// Job record
// ==========================================================================

/// Lifecycle state of an import job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "import_job_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportJobStatus {
    Processing,
    Completed,
    Failed,
    /// Reserved; no transition produces it
    Cancelled,
}

impl ImportJobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ImportJobStatus::Processing)
    }
}

/// Persisted bulk import job (row of `bulk_processing`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub job_id: String,
    pub status: ImportJobStatus,
    #[sqlx(try_from = "i32")]
    pub total_records: u32,
    #[sqlx(try_from = "i32")]
    pub processed_records: u32,
    #[sqlx(try_from = "i32")]
    pub success_records: u32,
    #[sqlx(try_from = "i32")]
    pub failed_records: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn new(job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            status: ImportJobStatus::Processing,
            total_records: 0,
            processed_records: 0,
            success_records: 0,
            failed_records: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `success + failed == processed <= total`
    pub fn is_consistent(&self) -> bool {
        self.success_records + self.failed_records == self.processed_records
            && self.processed_records <= self.total_records
    }

    /// Human-readable status line shown to pollers
    pub fn status_message(&self) -> String {
        match self.status {
            ImportJobStatus::Failed => format!(
                "Processing failed: {}",
                self.error_message.as_deref().unwrap_or("unknown error")
            ),
            ImportJobStatus::Completed => "Processing completed successfully".to_string(),
            _ => "Processing in progress...".to_string(),
        }
    }
}

// ==========================================================================
// Request / response payloads
// ==========================================================================

/// Spreadsheet upload carried over NATS
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUploadRequest {
    pub filename: String,
    /// Base64 (standard alphabet) encoded file content
    pub file_base64: String,
}

/// Status query for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkStatusRequest {
    pub job_id: String,
}

/// Reply to both submissions and status queries.
///
/// Submissions only fill `job_id`, `status` and `message`. A refused
/// submission still carries the id it was assigned, but no job is stored
/// under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUploadResponse {
    pub job_id: String,
    pub status: ImportJobStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_records: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_records: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_records: Option<u32>,
}

impl BulkUploadResponse {
    /// Submission accepted, ingestion running in the background
    pub fn accepted(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: ImportJobStatus::Processing,
            message: "Bulk upload started successfully. Use jobId to check status.".to_string(),
            total_records: None,
            processed_records: None,
            success_records: None,
            failed_records: None,
        }
    }

    /// Submission refused before any job was stored
    pub fn rejected(job_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            job_id: job_id.into(),
            status: ImportJobStatus::Failed,
            message: format!("Failed to start bulk upload: {}", reason),
            total_records: None,
            processed_records: None,
            success_records: None,
            failed_records: None,
        }
    }

    /// Snapshot of a stored job for pollers
    pub fn status_of(job: &ImportJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            message: job.status_message(),
            total_records: Some(job.total_records),
            processed_records: Some(job.processed_records),
            success_records: Some(job.success_records),
            failed_records: Some(job.failed_records),
        }
    }
}
