//! Manual and bulk redelivery of dead-lettered flows.

use crate::config::ManualRetry;
use crate::dead_letter::{COLUMN_BLOB, DeadLetterRecorder, queued_event};
use crate::event::DeliveryEvent;
use crate::handler::{Delivery, DeliveryFailure, DeliveryHandler};
use crate::metrics_defs::RETRY_REQUESTS;
use serde::Serialize;
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;
use storage::{BlobStore, StorageError, TableEntity};
use thiserror::Error;

#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Delivered again; `removed_rows` dead-letter rows were deleted.
    Redelivered { removed_rows: usize },
    NotFound,
}

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Delivery(#[from] DeliveryFailure),

    #[error("{0} is not flagged for conversion")]
    NotFlagged(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BulkRetrySummary {
    pub attempted: usize,
    pub redelivered: usize,
    pub failed: usize,
}

pub struct Redriver {
    blobs: Arc<dyn BlobStore>,
    handler: Arc<DeliveryHandler>,
    recorder: DeadLetterRecorder,
    retry_index: Option<u32>,
}

impl Redriver {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        handler: Arc<DeliveryHandler>,
        recorder: DeadLetterRecorder,
        manual_retry: ManualRetry,
    ) -> Self {
        let retry_index = match manual_retry {
            ManualRetry::Detached => None,
            ManualRetry::FinalAttempt => Some(handler.policy().max_retry_count()),
        };

        Redriver {
            blobs,
            handler,
            recorder,
            retry_index,
        }
    }

    /// Reads the blob again, or the payload stored on a queue row when no
    /// such blob exists, and runs it through the handler. On success every
    /// dead-letter row of the source is deleted.
    pub async fn retry_one(&self, source_name: &str) -> Result<RetryOutcome, RetryError> {
        let result = match self.load_event(source_name).await {
            Ok(event) => self.redeliver(source_name, event).await,
            Err(e) => Err(e.into()),
        };
        let outcome = match &result {
            Ok(RetryOutcome::Redelivered { .. }) => "redelivered",
            Ok(RetryOutcome::NotFound) => "not_found",
            Err(_) => "failed",
        };
        counter!(RETRY_REQUESTS, "scope" => "single", "outcome" => outcome).increment(1);

        let removed_rows = match result? {
            RetryOutcome::Redelivered { .. } => self.remove_rows(source_name).await,
            RetryOutcome::NotFound => return Ok(RetryOutcome::NotFound),
        };
        Ok(RetryOutcome::Redelivered { removed_rows })
    }

    /// Walks the whole dead-letter table page by page. Rows are redelivered
    /// one at a time and deleted only when their redelivery succeeds.
    /// Fails only if listing a page fails.
    pub async fn retry_all(&self) -> Result<BulkRetrySummary, StorageError> {
        let mut summary = BulkRetrySummary::default();
        // outcome per blob in this run, so a blob with several rows is only
        // sent once and rows written during the run are not retried again
        let mut seen: HashMap<String, bool> = HashMap::new();
        let mut continuation = None;

        loop {
            let page = self.recorder.list_page(continuation.as_ref()).await?;
            for row in page.entities {
                summary.attempted += 1;
                match self.retry_row(&row, &mut seen).await {
                    true => summary.redelivered += 1,
                    false => summary.failed += 1,
                }
            }

            match page.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        tracing::info!(
            attempted = summary.attempted,
            redelivered = summary.redelivered,
            failed = summary.failed,
            "Bulk retry finished"
        );
        Ok(summary)
    }

    async fn retry_row(&self, row: &TableEntity, seen: &mut HashMap<String, bool>) -> bool {
        let Some(source_name) = row.property_str(COLUMN_BLOB) else {
            tracing::warn!(
                partition_key = %row.partition_key,
                row_key = %row.row_key,
                "Dead-letter row has no blob column, keeping it"
            );
            return false;
        };

        let delivered = match seen.get(source_name) {
            Some(delivered) => *delivered,
            None => {
                let loaded = match queued_event(row) {
                    Some(event) => Ok(Some(event)),
                    None => self.fetch_blob(source_name).await,
                };
                let result = match loaded {
                    Ok(event) => self.redeliver(source_name, event).await,
                    Err(e) => Err(e.into()),
                };
                let delivered = matches!(result, Ok(RetryOutcome::Redelivered { .. }));
                let outcome = match &result {
                    Ok(RetryOutcome::Redelivered { .. }) => "redelivered",
                    Ok(RetryOutcome::NotFound) => "not_found",
                    Err(_) => "failed",
                };
                counter!(RETRY_REQUESTS, "scope" => "bulk", "outcome" => outcome).increment(1);
                tracing::info!(
                    blob = source_name,
                    partition_key = %row.partition_key,
                    row_key = %row.row_key,
                    outcome,
                    "Retry table entity processed"
                );
                seen.insert(source_name.to_string(), delivered);
                delivered
            }
        };

        if !delivered {
            return false;
        }
        if let Err(e) = self.recorder.delete(row).await {
            tracing::warn!(
                blob = source_name,
                partition_key = %row.partition_key,
                row_key = %row.row_key,
                error = %e,
                "Redelivered but could not delete dead-letter row"
            );
        }
        true
    }

    async fn fetch_blob(&self, source_name: &str) -> Result<Option<DeliveryEvent>, StorageError> {
        Ok(self
            .blobs
            .fetch(source_name)
            .await?
            .map(DeliveryEvent::from_blob))
    }

    async fn load_event(&self, source_name: &str) -> Result<Option<DeliveryEvent>, StorageError> {
        if let Some(event) = self.fetch_blob(source_name).await? {
            return Ok(Some(event));
        }
        let rows = self.recorder.find_for_source(source_name).await?;
        Ok(rows.iter().find_map(queued_event))
    }

    async fn redeliver(
        &self,
        source_name: &str,
        event: Option<DeliveryEvent>,
    ) -> Result<RetryOutcome, RetryError> {
        let Some(event) = event else {
            tracing::info!(blob = source_name, "Nothing to redeliver");
            return Ok(RetryOutcome::NotFound);
        };

        let event = event.with_retry_index(self.retry_index);
        match self.handler.handle(&event).await? {
            Delivery::Delivered => Ok(RetryOutcome::Redelivered { removed_rows: 0 }),
            Delivery::Skipped => Err(RetryError::NotFlagged(source_name.to_string())),
        }
    }

    async fn remove_rows(&self, source_name: &str) -> usize {
        match self.recorder.remove_for_source(source_name).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(blob = source_name, error = %e, "Redelivered but could not delete dead-letter rows");
                0
            }
        }
    }
}
