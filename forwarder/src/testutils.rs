use crate::alert::{Alert, AlertSink};
use crate::client::Downstream;
use crate::codec::{EncodedPayload, PayloadForm};
use crate::config::{DownstreamConfig, RetryConfig};
use crate::dead_letter::{COLUMN_BLOB, COLUMN_ERROR_TYPE, DeadLetterRecorder};
use crate::decision::RetryPolicy;
use crate::errors::DeliveryError;
use crate::event::DeliveryEvent;
use crate::handler::DeliveryHandler;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use storage::{BlobData, Continuation, EntityPage, StorageError, TableEntity, TableStore};
use url::Url;

#[derive(Clone)]
enum Reply {
    Accept,
    Reject(u16, String),
    Unreachable,
}

/// Scripted conversion API. Expects JSON-wrapped payloads.
pub struct MockDownstream {
    default: Reply,
    by_content: Mutex<HashMap<Vec<u8>, Reply>>,
    sent: Mutex<Vec<(String, EncodedPayload)>>,
}

impl MockDownstream {
    fn with_default(default: Reply) -> Arc<Self> {
        Arc::new(MockDownstream {
            default,
            by_content: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::with_default(Reply::Accept)
    }

    pub fn http_error(status: u16, body: &str) -> Arc<Self> {
        Self::with_default(Reply::Reject(status, body.to_string()))
    }

    pub fn transport_error() -> Arc<Self> {
        Self::with_default(Reply::Unreachable)
    }

    /// Answers `status` for payloads whose original content is `content`.
    pub fn reject_content(&self, content: &[u8], status: u16) {
        self.by_content
            .lock()
            .insert(content.to_vec(), Reply::Reject(status, "rejected".into()));
    }

    /// Back to the default reply for every payload.
    pub fn clear_rejections(&self) {
        self.by_content.lock().clear();
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn last_body(&self) -> Option<String> {
        self.sent
            .lock()
            .last()
            .map(|(_, payload)| String::from_utf8_lossy(&payload.body).into_owned())
    }

    pub fn last_api_key(&self) -> Option<String> {
        self.sent.lock().last().map(|(key, _)| key.clone())
    }
}

fn unwrap_json(payload: &EncodedPayload) -> Vec<u8> {
    serde_json::from_slice::<serde_json::Value>(&payload.body)
        .ok()
        .and_then(|wrapped| {
            let encoded = wrapped.get("payload")?.as_str()?.to_string();
            STANDARD.decode(encoded).ok()
        })
        .unwrap_or_default()
}

/// A real reqwest error without touching the network: the URL has no host.
async fn transport_error() -> DeliveryError {
    match reqwest::Client::new().post("http://").send().await {
        Err(e) => DeliveryError::Transport(e),
        Ok(_) => unreachable!("request without host cannot succeed"),
    }
}

#[async_trait]
impl Downstream for MockDownstream {
    async fn send(&self, api_key: &str, payload: EncodedPayload) -> Result<(), DeliveryError> {
        let content = unwrap_json(&payload);
        self.sent.lock().push((api_key.to_string(), payload));

        let reply = self
            .by_content
            .lock()
            .get(&content)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        match reply {
            Reply::Accept => Ok(()),
            Reply::Reject(status, body) => Err(DeliveryError::Http { status, body }),
            Reply::Unreachable => Err(transport_error().await),
        }
    }
}

#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn raise(&self, alert: &Alert) {
        self.alerts.lock().push(alert.clone());
    }
}

/// Table that is always unavailable.
pub struct FailingTableStore;

fn unavailable() -> StorageError {
    StorageError::UnexpectedStatus {
        status: 503,
        body: "unavailable".into(),
    }
}

#[async_trait]
impl TableStore for FailingTableStore {
    async fn upsert(&self, _entity: TableEntity) -> Result<(), StorageError> {
        Err(unavailable())
    }

    async fn delete(&self, _partition_key: &str, _row_key: &str) -> Result<(), StorageError> {
        Err(unavailable())
    }

    async fn list_page(
        &self,
        _continuation: Option<&Continuation>,
    ) -> Result<EntityPage, StorageError> {
        Err(unavailable())
    }

    async fn find(&self, _property: &str, _value: &str) -> Result<Vec<TableEntity>, StorageError> {
        Err(unavailable())
    }
}

pub fn downstream_config(base_url: &str) -> DownstreamConfig {
    DownstreamConfig {
        base_url: Url::parse(base_url).unwrap(),
        path: "/convert/fdr3".into(),
        api_key: "secret".into(),
        payload_form: PayloadForm::Json,
        timeout_secs: 5,
    }
}

pub fn handler_with(
    downstream: Arc<MockDownstream>,
    table: Arc<dyn TableStore>,
    alerts: Arc<RecordingAlertSink>,
) -> DeliveryHandler {
    DeliveryHandler::new(
        downstream,
        DeadLetterRecorder::new(table),
        alerts,
        RetryPolicy::new(&RetryConfig::default()),
        "secret".into(),
        PayloadForm::Json,
        "fdr3-flows".into(),
    )
}

/// Event for `source_name` with content `test` and `elaborate=true`.
pub fn flagged_event(source_name: &str) -> DeliveryEvent {
    DeliveryEvent::new(source_name, &b"test"[..], HashMap::new()).with_metadata("elaborate", "true")
}

pub fn blob(name: &str, content: &[u8], metadata: &[(&str, &str)]) -> BlobData {
    BlobData::new(
        name,
        content.to_vec(),
        metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

pub fn flagged_blob(name: &str, content: &[u8]) -> BlobData {
    blob(name, content, &[("elaborate", "true")])
}

/// A dead-letter row as written on the 2024-01-15 partition.
pub fn dead_letter_row(blob: &str, session_id: &str) -> TableEntity {
    TableEntity::new("2024-01-15", session_id)
        .with_property(COLUMN_BLOB, blob)
        .with_property(COLUMN_ERROR_TYPE, "HTTP_ERROR")
}
