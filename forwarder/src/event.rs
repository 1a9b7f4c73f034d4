use bytes::Bytes;
use std::collections::HashMap;
use storage::BlobData;

/// Metadata key holding the "forward this flow" flag.
pub const FORWARD_FLAG_KEY: &str = "elaborate";
pub const SESSION_ID_KEY: &str = "sessionId";
pub const INSERTED_TIMESTAMP_KEY: &str = "insertedTimestamp";

/// Where an event's payload lives. Blob payloads can be read again from the
/// container, queue payloads are gone once the message is dequeued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceKind {
    #[default]
    Blob,
    Queue,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Blob => "blob",
            SourceKind::Queue => "queue",
        }
    }

    /// Rows written before the kind was recorded are blob rows.
    pub fn from_column(value: Option<&str>) -> Self {
        match value {
            Some(kind) if kind.eq_ignore_ascii_case("queue") => SourceKind::Queue,
            _ => SourceKind::Blob,
        }
    }
}

/// One trigger invocation. Built per event and never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryEvent {
    pub source_name: String,
    pub kind: SourceKind,
    pub payload: Bytes,
    pub metadata: HashMap<String, String>,
    /// Zero-based attempt count, `None` when the runtime gave no retry context.
    pub retry_index: Option<u32>,
}

impl DeliveryEvent {
    pub fn new(
        source_name: impl Into<String>,
        payload: impl Into<Bytes>,
        metadata: HashMap<String, String>,
    ) -> Self {
        DeliveryEvent {
            source_name: source_name.into(),
            kind: SourceKind::Blob,
            payload: payload.into(),
            metadata,
            retry_index: None,
        }
    }

    pub fn from_blob(blob: BlobData) -> Self {
        DeliveryEvent::new(blob.name, blob.content, blob.metadata)
    }

    pub fn queued(
        source_name: impl Into<String>,
        payload: impl Into<Bytes>,
        metadata: HashMap<String, String>,
    ) -> Self {
        DeliveryEvent {
            kind: SourceKind::Queue,
            ..DeliveryEvent::new(source_name, payload, metadata)
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_retry_index(mut self, retry_index: Option<u32>) -> Self {
        self.retry_index = retry_index;
        self
    }

    /// Metadata lookup ignoring key case. Blob metadata comes back from the
    /// storage service as lowercased headers.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .or_else(|| {
                self.metadata
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    /// Only flows flagged `elaborate=true` are forwarded.
    pub fn should_forward(&self) -> bool {
        self.metadata_value(FORWARD_FLAG_KEY)
            .is_some_and(|flag| flag.eq_ignore_ascii_case("true"))
    }

    pub fn session_id(&self) -> Option<&str> {
        self.metadata_value(SESSION_ID_KEY)
            .filter(|id| !id.trim().is_empty())
    }

    pub fn inserted_timestamp(&self) -> Option<&str> {
        self.metadata_value(INSERTED_TIMESTAMP_KEY)
    }
}

/// The runtime reports "no retry context" as `-1`.
pub fn retry_index_from_wire(value: Option<i64>) -> Option<u32> {
    value.and_then(|index| u32::try_from(index).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(metadata: &[(&str, &str)]) -> DeliveryEvent {
        DeliveryEvent::new(
            "flow.xml.zip",
            &b"test"[..],
            metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_forward_flag() {
        assert!(event(&[("elaborate", "true")]).should_forward());
        assert!(event(&[("elaborate", "TRUE")]).should_forward());
        assert!(event(&[("Elaborate", "True")]).should_forward());
        assert!(!event(&[("elaborate", "false")]).should_forward());
        assert!(!event(&[("elaborate", "yes")]).should_forward());
        assert!(!event(&[("elaborate", "")]).should_forward());
        assert!(!event(&[]).should_forward());
    }

    #[test]
    fn test_lowercased_metadata_keys() {
        let event = event(&[("sessionid", "abc"), ("insertedtimestamp", "2024-01-15T10:00:00")]);
        assert_eq!(event.session_id(), Some("abc"));
        assert_eq!(event.inserted_timestamp(), Some("2024-01-15T10:00:00"));
    }

    #[test]
    fn test_blank_session_id_is_absent() {
        assert_eq!(event(&[("sessionId", " ")]).session_id(), None);
    }

    #[test]
    fn test_source_kind_column() {
        assert_eq!(SourceKind::from_column(Some("queue")), SourceKind::Queue);
        assert_eq!(SourceKind::from_column(Some("blob")), SourceKind::Blob);
        assert_eq!(SourceKind::from_column(None), SourceKind::Blob);
        assert_eq!(
            SourceKind::from_column(Some(SourceKind::Queue.as_str())),
            SourceKind::Queue
        );
    }

    #[test]
    fn test_retry_index_from_wire() {
        assert_eq!(retry_index_from_wire(None), None);
        assert_eq!(retry_index_from_wire(Some(-1)), None);
        assert_eq!(retry_index_from_wire(Some(0)), Some(0));
        assert_eq!(retry_index_from_wire(Some(4)), Some(4));
    }
}
