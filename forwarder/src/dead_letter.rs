//! Durable record of deliveries that exhausted their retries.

use crate::errors::ErrorKind;
use crate::event::{DeliveryEvent, SourceKind};
use crate::metrics_defs::{DEAD_LETTER_WRITE_FAILURES, DEAD_LETTER_WRITES};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use shared::counter;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use storage::{Continuation, EntityPage, StorageError, TableEntity, TableStore};
use uuid::Uuid;

pub const COLUMN_ID: &str = "uniqueId";
pub const COLUMN_BLOB: &str = "blob";
pub const COLUMN_SESSION_ID: &str = "blobSessionId";
pub const COLUMN_METADATA: &str = "blobMetadata";
pub const COLUMN_CREATED: &str = "created";
pub const COLUMN_MESSAGE: &str = "message";
pub const COLUMN_ERROR_TYPE: &str = "errorType";
pub const COLUMN_HTTP_ERROR_RESPONSE: &str = "httpErrorResponse";
pub const COLUMN_STACK_TRACE: &str = "stackTrace";
pub const COLUMN_SOURCE_KIND: &str = "sourceKind";
/// Base64 message content, only on queue rows.
pub const COLUMN_PAYLOAD: &str = "payload";

const GENERATED_ID_PREFIX: &str = "NA_";
/// Largest binary property the table service accepts.
const MAX_STORED_PAYLOAD: usize = 64 * 1024;

/// One row of the dead-letter table.
#[derive(Clone, Debug, PartialEq)]
pub struct DeadLetterRecord {
    pub id: String,
    pub partition_key: String,
    pub source_name: String,
    pub kind: SourceKind,
    pub session_id: String,
    pub metadata: String,
    /// Base64 payload kept for queue events, which cannot be read back later.
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub message: String,
    pub error_kind: ErrorKind,
    pub http_response_body: Option<String>,
    pub stack_trace: String,
}

/// Details of the failure being recorded.
#[derive(Clone, Debug)]
pub struct Failure<'a> {
    pub kind: ErrorKind,
    pub message: &'a str,
    pub http_response_body: Option<&'a str>,
    pub stack_trace: &'a str,
}

impl DeadLetterRecord {
    pub fn new(event: &DeliveryEvent, failure: &Failure<'_>, now: DateTime<Utc>) -> Self {
        let id = match event.session_id() {
            Some(session_id) => session_id.to_string(),
            None => format!("{GENERATED_ID_PREFIX}{}", Uuid::new_v4()),
        };
        // BTreeMap keeps the serialized metadata stable
        let metadata: BTreeMap<_, _> = event.metadata.iter().collect();

        DeadLetterRecord {
            partition_key: partition_key(event, now),
            session_id: id.clone(),
            id,
            source_name: event.source_name.clone(),
            kind: event.kind,
            metadata: serde_json::to_string(&metadata).unwrap_or_default(),
            payload: stored_payload(event),
            created_at: now,
            message: failure.message.to_string(),
            error_kind: failure.kind,
            http_response_body: failure.http_response_body.map(String::from),
            stack_trace: failure.stack_trace.to_string(),
        }
    }

    pub fn into_entity(self) -> TableEntity {
        let mut entity = TableEntity::new(self.partition_key, self.id.clone())
            .with_property(COLUMN_ID, self.id)
            .with_property(COLUMN_BLOB, self.source_name)
            .with_property(COLUMN_SOURCE_KIND, self.kind.as_str())
            .with_property(COLUMN_SESSION_ID, self.session_id)
            .with_property(COLUMN_METADATA, self.metadata)
            .with_property(
                COLUMN_CREATED,
                self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .with_property(format!("{COLUMN_CREATED}@odata.type"), "Edm.DateTime")
            .with_property(COLUMN_MESSAGE, self.message)
            .with_property(COLUMN_ERROR_TYPE, self.error_kind.as_str())
            .with_property(COLUMN_STACK_TRACE, self.stack_trace);
        if let Some(body) = self.http_response_body {
            entity = entity.with_property(COLUMN_HTTP_ERROR_RESPONSE, Value::String(body));
        }
        if let Some(payload) = self.payload {
            entity = entity
                .with_property(COLUMN_PAYLOAD, payload)
                .with_property(format!("{COLUMN_PAYLOAD}@odata.type"), "Edm.Binary");
        }
        entity
    }
}

fn stored_payload(event: &DeliveryEvent) -> Option<String> {
    if event.kind != SourceKind::Queue {
        return None;
    }
    if event.payload.len() > MAX_STORED_PAYLOAD {
        tracing::warn!(
            blob = %event.source_name,
            size = event.payload.len(),
            "queue payload too large to keep, the row cannot be redelivered"
        );
        return None;
    }
    Some(STANDARD.encode(&event.payload))
}

/// Rebuilds the event of a queue row from its stored payload and metadata.
/// `None` for blob rows and for queue rows without a usable payload.
pub fn queued_event(row: &TableEntity) -> Option<DeliveryEvent> {
    if SourceKind::from_column(row.property_str(COLUMN_SOURCE_KIND)) != SourceKind::Queue {
        return None;
    }
    let source_name = row.property_str(COLUMN_BLOB)?;
    let payload = match STANDARD.decode(row.property_str(COLUMN_PAYLOAD)?) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(
                blob = source_name,
                row_key = %row.row_key,
                error = %e,
                "stored queue payload is not base64"
            );
            return None;
        }
    };
    let metadata: HashMap<String, String> = row
        .property_str(COLUMN_METADATA)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    Some(DeliveryEvent::queued(source_name, payload, metadata))
}

/// Day of the flow's insertion (`YYYY-MM-DD`), or of `now` when the
/// metadata carries no parseable `insertedTimestamp`.
fn partition_key(event: &DeliveryEvent, now: DateTime<Utc>) -> String {
    let day = match event.inserted_timestamp() {
        Some(raw) => match parse_timestamp(raw) {
            Some(inserted) => inserted,
            None => {
                tracing::warn!(
                    blob = %event.source_name,
                    inserted_timestamp = raw,
                    "could not parse insertedTimestamp, partitioning by current date"
                );
                now.naive_utc()
            }
        },
        None => now.naive_utc(),
    };
    day.format("%Y-%m-%d").to_string()
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

/// Result of a dead-letter write. Never an error for the caller to propagate.
#[derive(Debug)]
pub enum RecordOutcome {
    Written {
        partition_key: String,
        row_key: String,
    },
    WriteFailed {
        partition_key: String,
        row_key: String,
        error: StorageError,
    },
}

#[derive(Clone)]
pub struct DeadLetterRecorder {
    table: Arc<dyn TableStore>,
}

impl DeadLetterRecorder {
    pub fn new(table: Arc<dyn TableStore>) -> Self {
        DeadLetterRecorder { table }
    }

    /// Writes (or overwrites) the row for this event.
    pub async fn record(&self, event: &DeliveryEvent, failure: &Failure<'_>) -> RecordOutcome {
        let record = DeadLetterRecord::new(event, failure, Utc::now());
        let partition_key = record.partition_key.clone();
        let row_key = record.id.clone();

        match self.table.upsert(record.into_entity()).await {
            Ok(()) => {
                counter!(DEAD_LETTER_WRITES).increment(1);
                RecordOutcome::Written {
                    partition_key,
                    row_key,
                }
            }
            Err(error) => {
                counter!(DEAD_LETTER_WRITE_FAILURES).increment(1);
                RecordOutcome::WriteFailed {
                    partition_key,
                    row_key,
                    error,
                }
            }
        }
    }

    /// Rows recorded for `source_name`.
    pub async fn find_for_source(
        &self,
        source_name: &str,
    ) -> Result<Vec<TableEntity>, StorageError> {
        self.table.find(COLUMN_BLOB, source_name).await
    }

    /// Deletes every row recorded for `source_name`. Returns how many were deleted.
    pub async fn remove_for_source(&self, source_name: &str) -> Result<usize, StorageError> {
        let rows = self.find_for_source(source_name).await?;
        for row in &rows {
            self.delete(row).await?;
        }
        Ok(rows.len())
    }

    pub async fn delete(&self, row: &TableEntity) -> Result<(), StorageError> {
        self.table.delete(&row.partition_key, &row.row_key).await
    }

    pub async fn list_page(
        &self,
        continuation: Option<&Continuation>,
    ) -> Result<EntityPage, StorageError> {
        self.table.list_page(continuation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{FailingTableStore, flagged_event};
    use chrono::TimeZone;
    use std::time::Duration;
    use storage::MemoryTableStore;
    use storage::azure::{AzureTableStore, StorageAccount};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn failure() -> Failure<'static> {
        Failure {
            kind: ErrorKind::HttpError,
            message: "conversion API responded with status 500",
            http_response_body: Some("internal error"),
            stack_trace: "conversion API responded with status 500",
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap()
    }

    #[test]
    fn test_record_columns() {
        let event = flagged_event("flow-1.zip")
            .with_metadata("sessionId", "session-1")
            .with_metadata("insertedTimestamp", "2024-01-15T10:20:30.123");
        let entity = DeadLetterRecord::new(&event, &failure(), now()).into_entity();

        assert_eq!(entity.partition_key, "2024-01-15");
        assert_eq!(entity.row_key, "session-1");
        assert_eq!(entity.property_str(COLUMN_ID), Some("session-1"));
        assert_eq!(entity.property_str(COLUMN_BLOB), Some("flow-1.zip"));
        assert_eq!(entity.property_str(COLUMN_SESSION_ID), Some("session-1"));
        assert_eq!(entity.property_str(COLUMN_ERROR_TYPE), Some("HTTP_ERROR"));
        assert_eq!(
            entity.property_str(COLUMN_HTTP_ERROR_RESPONSE),
            Some("internal error")
        );
        assert_eq!(
            entity.property_str(COLUMN_CREATED),
            Some("2024-03-09T23:59:00.000Z")
        );
        assert!(
            entity
                .property_str(COLUMN_METADATA)
                .unwrap()
                .contains("\"sessionId\":\"session-1\"")
        );
        assert_eq!(entity.property_str(COLUMN_SOURCE_KIND), Some("blob"));
        assert_eq!(entity.property_str(COLUMN_PAYLOAD), None);
    }

    #[test]
    fn test_queue_row_keeps_payload() {
        let mut metadata = HashMap::new();
        metadata.insert("elaborate".to_string(), "true".to_string());
        metadata.insert("sessionId".to_string(), "session-9".to_string());
        let event = DeliveryEvent::queued("msg-1", &b"<flow/>"[..], metadata).with_retry_index(Some(4));
        let row = DeadLetterRecord::new(&event, &failure(), now()).into_entity();

        assert_eq!(row.property_str(COLUMN_SOURCE_KIND), Some("queue"));
        assert_eq!(row.property_str(COLUMN_PAYLOAD), Some("PGZsb3cvPg=="));

        let replayed = queued_event(&row).unwrap();
        assert_eq!(replayed.source_name, "msg-1");
        assert_eq!(replayed.kind, SourceKind::Queue);
        assert_eq!(&replayed.payload[..], b"<flow/>");
        assert!(replayed.should_forward());
        assert_eq!(replayed.session_id(), Some("session-9"));
        assert_eq!(replayed.retry_index, None);
    }

    #[test]
    fn test_oversized_queue_payload_is_not_kept() {
        let event = DeliveryEvent::queued("msg-1", vec![b'x'; MAX_STORED_PAYLOAD + 1], HashMap::new());
        let row = DeadLetterRecord::new(&event, &failure(), now()).into_entity();

        assert_eq!(row.property_str(COLUMN_SOURCE_KIND), Some("queue"));
        assert_eq!(row.property_str(COLUMN_PAYLOAD), None);
        assert!(queued_event(&row).is_none());
    }

    #[test]
    fn test_blob_rows_are_not_replayed_from_the_table() {
        let row = DeadLetterRecord::new(&flagged_event("flow-1.zip"), &failure(), now()).into_entity();
        assert!(queued_event(&row).is_none());
        // rows written before the kind column existed
        let legacy = TableEntity::new("2024-01-15", "s1").with_property(COLUMN_BLOB, "flow-1.zip");
        assert!(queued_event(&legacy).is_none());
    }

    #[test]
    fn test_generated_row_key_without_session() {
        let event = flagged_event("flow-1.zip");
        let record = DeadLetterRecord::new(&event, &failure(), now());

        assert!(record.id.starts_with("NA_"));
        assert_eq!(record.id.len(), "NA_".len() + 36);
        assert_eq!(record.partition_key, "2024-03-09");
    }

    #[test]
    fn test_partition_key_falls_back_to_now() {
        let event = flagged_event("flow-1.zip").with_metadata("insertedTimestamp", "yesterday");
        let record = DeadLetterRecord::new(&event, &failure(), now());
        assert_eq!(record.partition_key, "2024-03-09");
    }

    #[test]
    fn test_partition_key_from_rfc3339() {
        let event = flagged_event("flow-1.zip")
            .with_metadata("insertedTimestamp", "2024-01-15T23:30:00+02:00");
        let record = DeadLetterRecord::new(&event, &failure(), now());
        assert_eq!(record.partition_key, "2024-01-15");
    }

    #[tokio::test]
    async fn test_record_overwrites_same_session() {
        let table = Arc::new(MemoryTableStore::new());
        let recorder = DeadLetterRecorder::new(table.clone());
        let event = flagged_event("flow-1.zip")
            .with_metadata("sessionId", "session-1")
            .with_metadata("insertedTimestamp", "2024-01-15T10:20:30");

        recorder.record(&event, &failure()).await;
        let second = Failure {
            kind: ErrorKind::GenericError,
            message: "connection reset",
            http_response_body: None,
            stack_trace: "connection reset",
        };
        let outcome = recorder.record(&event, &second).await;

        assert!(matches!(outcome, RecordOutcome::Written { ref row_key, .. } if row_key == "session-1"));
        assert_eq!(table.len(), 1);
        let row = table.get("2024-01-15", "session-1").unwrap();
        assert_eq!(row.property_str(COLUMN_ERROR_TYPE), Some("GENERIC_ERROR"));
        assert_eq!(row.property_str(COLUMN_HTTP_ERROR_RESPONSE), None);
    }

    #[tokio::test]
    async fn test_write_failure_is_an_outcome() {
        let recorder = DeadLetterRecorder::new(Arc::new(FailingTableStore));
        let outcome = recorder
            .record(&flagged_event("flow-1.zip"), &failure())
            .await;
        assert!(matches!(outcome, RecordOutcome::WriteFailed { .. }));
    }

    #[tokio::test]
    async fn test_slow_table_is_a_write_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;
        let endpoint = url::Url::parse(&format!("{}/devstoreaccount1", server.uri())).unwrap();
        let account =
            StorageAccount::new("devstoreaccount1", "c2VjcmV0", endpoint.clone(), endpoint)
                .unwrap();
        let table = AzureTableStore::connect(account, "errors", Duration::from_millis(300))
            .await
            .unwrap();

        let recorder = DeadLetterRecorder::new(Arc::new(table));
        let outcome = recorder
            .record(&flagged_event("flow-1.zip"), &failure())
            .await;
        assert!(matches!(
            outcome,
            RecordOutcome::WriteFailed { error: StorageError::Http(ref e), .. } if e.is_timeout()
        ));
    }

    #[tokio::test]
    async fn test_remove_for_source() {
        let table = Arc::new(MemoryTableStore::new());
        let recorder = DeadLetterRecorder::new(table.clone());
        for (blob, session) in [("a.zip", "s1"), ("a.zip", "s2"), ("b.zip", "s3")] {
            let event = flagged_event(blob).with_metadata("sessionId", session);
            recorder.record(&event, &failure()).await;
        }

        assert_eq!(recorder.remove_for_source("a.zip").await.unwrap(), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(recorder.remove_for_source("missing.zip").await.unwrap(), 0);
    }
}
