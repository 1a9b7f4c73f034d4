//! Trigger endpoints the hosting runtime delivers blob and queue events to.

use crate::api::utils::{ResponseBody, json_error, json_response};
use crate::decision::RetryPolicy;
use crate::event::{DeliveryEvent, retry_index_from_wire};
use crate::handler::{DeliveryFailure, DeliveryHandler};
use crate::metrics_defs::EVENTS_RECEIVED;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hyper::header::{HeaderValue, RETRY_AFTER};
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use shared::counter;
use std::collections::HashMap;
use uuid::Uuid;

/// Name prefix for queue messages delivered without an id.
const QUEUE_SOURCE_PREFIX: &str = "queue-message";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BlobEventRequest {
    pub blob_name: String,
    /// Base64 of the blob content
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// `-1` or absent when there is no retry context
    #[serde(default)]
    pub retry_index: Option<i64>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct QueueEventRequest {
    #[serde(default)]
    pub id: Option<String>,
    /// Base64 of the message content
    pub message: String,
    /// Starts at 1 on the first delivery
    #[serde(default)]
    pub dequeue_count: Option<u32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Serialize)]
struct ProcessedBody {
    processed: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureBody {
    error: String,
    error_type: &'static str,
    terminal: bool,
    retry_index: Option<u32>,
}

impl BlobEventRequest {
    pub fn into_event(self) -> Result<DeliveryEvent, base64::DecodeError> {
        let content = STANDARD.decode(self.content)?;
        Ok(DeliveryEvent::new(self.blob_name, content, self.metadata)
            .with_retry_index(retry_index_from_wire(self.retry_index)))
    }
}

impl QueueEventRequest {
    pub fn into_event(self) -> Result<DeliveryEvent, base64::DecodeError> {
        let content = STANDARD.decode(self.message.trim())?;
        // dead-letter rows are redelivered by name, so every message needs its own
        let source_name = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("{QUEUE_SOURCE_PREFIX}-{}", Uuid::new_v4()));
        let retry_index = self
            .dequeue_count
            .and_then(|count| count.checked_sub(1));
        Ok(DeliveryEvent::queued(source_name, content, self.metadata).with_retry_index(retry_index))
    }
}

pub async fn handle_blob_event(
    handler: &DeliveryHandler,
    request: BlobEventRequest,
) -> Response<ResponseBody> {
    counter!(EVENTS_RECEIVED, "trigger" => "blob").increment(1);
    match request.into_event() {
        Ok(event) => deliver(handler, &event).await,
        Err(e) => json_error(StatusCode::BAD_REQUEST, &format!("content is not base64: {e}")),
    }
}

pub async fn handle_queue_event(
    handler: &DeliveryHandler,
    request: QueueEventRequest,
) -> Response<ResponseBody> {
    counter!(EVENTS_RECEIVED, "trigger" => "queue").increment(1);
    match request.into_event() {
        Ok(event) => deliver(handler, &event).await,
        Err(e) => json_error(StatusCode::BAD_REQUEST, &format!("message is not base64: {e}")),
    }
}

async fn deliver(handler: &DeliveryHandler, event: &DeliveryEvent) -> Response<ResponseBody> {
    match handler.handle(event).await {
        Ok(delivery) => json_response(
            StatusCode::OK,
            &ProcessedBody {
                processed: delivery.processed(),
            },
        ),
        Err(failure) => failure_response(handler.policy(), &failure),
    }
}

/// 500 so the runtime counts the attempt as failed. Retryable failures
/// carry a `Retry-After` backoff hint.
pub fn failure_response(policy: &RetryPolicy, failure: &DeliveryFailure) -> Response<ResponseBody> {
    let mut response = json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &FailureBody {
            error: failure.error.to_string(),
            error_type: failure.decision.kind.as_str(),
            terminal: failure.is_terminal(),
            retry_index: failure.retry_index,
        },
    );

    if !failure.is_terminal() {
        let secs = policy.retry_after(failure.retry_index).as_secs();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::utils::body_json;
    use crate::event::SourceKind;
    use crate::testutils::{MockDownstream, RecordingAlertSink, handler_with};
    use serde_json::json;
    use std::sync::Arc;
    use storage::MemoryTableStore;

    fn blob_request(value: serde_json::Value) -> BlobEventRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_blob_request_into_event() {
        let event = blob_request(json!({
            "blobName": "flow-1.zip",
            "content": "dGVzdA==",
            "metadata": { "elaborate": "true" },
            "retryIndex": -1,
        }))
        .into_event()
        .unwrap();

        assert_eq!(event.source_name, "flow-1.zip");
        assert_eq!(event.kind, SourceKind::Blob);
        assert_eq!(&event.payload[..], b"test");
        assert_eq!(event.retry_index, None);
        assert!(event.should_forward());
    }

    #[test]
    fn test_queue_request_into_event() {
        let request: QueueEventRequest = serde_json::from_value(json!({
            "id": "msg-1",
            "message": "dGVzdA==",
            "dequeueCount": 3,
        }))
        .unwrap();
        let event = request.into_event().unwrap();
        assert_eq!(event.source_name, "msg-1");
        assert_eq!(event.kind, SourceKind::Queue);
        assert_eq!(event.retry_index, Some(2));

        let request: QueueEventRequest =
            serde_json::from_value(json!({ "message": "dGVzdA==" })).unwrap();
        let first = request.into_event().unwrap();
        let request: QueueEventRequest =
            serde_json::from_value(json!({ "message": "dGVzdA==" })).unwrap();
        let second = request.into_event().unwrap();
        assert!(first.source_name.starts_with("queue-message-"));
        assert_ne!(first.source_name, second.source_name);
        assert_eq!(first.retry_index, None);
    }

    #[tokio::test]
    async fn test_delivered_blob_event() {
        let handler = handler_with(
            MockDownstream::succeeding(),
            Arc::new(MemoryTableStore::new()),
            Arc::new(RecordingAlertSink::default()),
        );
        let request = blob_request(json!({
            "blobName": "flow-1.zip",
            "content": "dGVzdA==",
            "metadata": { "elaborate": "true" },
            "retryIndex": 0,
        }));

        let response = handle_blob_event(&handler, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "processed": true }));
    }

    #[tokio::test]
    async fn test_skipped_blob_event() {
        let downstream = MockDownstream::succeeding();
        let handler = handler_with(
            downstream.clone(),
            Arc::new(MemoryTableStore::new()),
            Arc::new(RecordingAlertSink::default()),
        );
        let request = blob_request(json!({ "blobName": "flow-1.zip", "content": "dGVzdA==" }));

        let response = handle_blob_event(&handler, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "processed": false }));
        assert_eq!(downstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_retryable_failure_has_retry_after() {
        let handler = handler_with(
            MockDownstream::http_error(500, "busy"),
            Arc::new(MemoryTableStore::new()),
            Arc::new(RecordingAlertSink::default()),
        );
        let request = blob_request(json!({
            "blobName": "flow-1.zip",
            "content": "dGVzdA==",
            "metadata": { "elaborate": "true" },
            "retryIndex": 2,
        }));

        let response = handle_blob_event(&handler, request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "40");
        assert_eq!(
            body_json(response).await,
            json!({
                "error": "conversion API responded with status 500",
                "errorType": "HTTP_ERROR",
                "terminal": false,
                "retryIndex": 2,
            })
        );
    }

    #[tokio::test]
    async fn test_terminal_failure_has_no_retry_after() {
        let table = Arc::new(MemoryTableStore::new());
        let handler = handler_with(
            MockDownstream::http_error(500, "busy"),
            table.clone(),
            Arc::new(RecordingAlertSink::default()),
        );
        let request = blob_request(json!({
            "blobName": "flow-1.zip",
            "content": "dGVzdA==",
            "metadata": { "elaborate": "true" },
            "retryIndex": 4,
        }));

        let response = handle_blob_event(&handler, request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(RETRY_AFTER).is_none());
        assert_eq!(body_json(response).await["terminal"], json!(true));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_base64_is_bad_request() {
        let handler = handler_with(
            MockDownstream::succeeding(),
            Arc::new(MemoryTableStore::new()),
            Arc::new(RecordingAlertSink::default()),
        );
        let request = blob_request(json!({ "blobName": "flow-1.zip", "content": "***" }));

        let response = handle_blob_event(&handler, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
