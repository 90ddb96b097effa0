//! Bulk import message handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{publish, reply_subject};
use crate::services::bulk_import::BulkImportService;
use crate::services::job_tracker::TrackerError;
use crate::types::{
    BulkStatusRequest, BulkUploadRequest, ErrorResponse, ImportJobStatus, Request, SuccessResponse,
};

/// Decode the uploaded file, accepting an optional `data:...;base64,` prefix
pub fn decode_file(request: &BulkUploadRequest) -> Result<Vec<u8>, base64::DecodeError> {
    let encoded = request.file_base64.trim();
    let encoded = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    STANDARD.decode(encoded)
}

/// Handle crm.customer.bulk.submit messages.
///
/// Refused uploads are answered with a FAILED `BulkUploadResponse` whose
/// `jobId` names no stored job; a status query for it returns NOT_FOUND.
pub async fn handle_submit(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<BulkImportService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received bulk submit message ({} bytes)", msg.payload.len());

        let Some(reply) = reply_subject(&msg) else {
            continue;
        };

        let request: Request<BulkUploadRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse bulk submit request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                publish(&client, reply, &error).await?;
                continue;
            }
        };

        let file = match decode_file(&request.payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Bulk upload '{}' is not valid base64: {}", request.payload.filename, e);
                let error = ErrorResponse::new(
                    request.id,
                    "INVALID_REQUEST",
                    format!("fileBase64 is not valid base64: {}", e),
                );
                publish(&client, reply, &error).await?;
                continue;
            }
        };

        let response = service.submit(file, &request.payload.filename).await;
        if response.status == ImportJobStatus::Processing {
            info!("Bulk upload '{}' queued as job {}", request.payload.filename, response.job_id);
        }
        publish(&client, reply, &SuccessResponse::new(request.id, response)).await?;
    }

    Ok(())
}

/// Handle crm.customer.bulk.status messages
pub async fn handle_status(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<BulkImportService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let Some(reply) = reply_subject(&msg) else {
            continue;
        };

        let request: Request<BulkStatusRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse bulk status request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                publish(&client, reply, &error).await?;
                continue;
            }
        };

        match service.status(&request.payload.job_id).await {
            Ok(status) => {
                publish(&client, reply, &SuccessResponse::new(request.id, status)).await?;
            }
            Err(TrackerError::NotFound(job_id)) => {
                debug!("Status requested for unknown job {}", job_id);
                let error = ErrorResponse::new(
                    request.id,
                    "NOT_FOUND",
                    TrackerError::NotFound(job_id).to_string(),
                );
                publish(&client, reply, &error).await?;
            }
            Err(e) => {
                error!("Failed to load job {}: {}", request.payload.job_id, e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                publish(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}
