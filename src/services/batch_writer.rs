//! Batched customer inserts for bulk imports

use std::sync::Arc;

use tracing::debug;

use super::store::{CustomerStore, StoreError};
use crate::types::CandidateRecord;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Accumulates imported customers and writes them with one `save_batch`
/// call per `batch_size` records. Call `finish` to write the remainder.
pub struct BatchWriter {
    store: Arc<dyn CustomerStore>,
    batch_size: usize,
    pending: Vec<CandidateRecord>,
    written: usize,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn CustomerStore>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            written: 0,
        }
    }

    /// Queue a record, flushing when the batch is full
    pub async fn add(&mut self, record: CandidateRecord) -> Result<(), StoreError> {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        self.store.save_batch(&self.pending).await?;
        self.written += self.pending.len();
        debug!("Flushed {} customers ({} written so far)", self.pending.len(), self.written);
        self.pending.clear();
        Ok(())
    }

    /// Write any partial batch; returns the total number of records written
    pub async fn finish(mut self) -> Result<usize, StoreError> {
        self.flush().await?;
        Ok(self.written)
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
