use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Content and user metadata of a single blob.
#[derive(Clone, Debug, PartialEq)]
pub struct BlobData {
    pub name: String,
    pub content: Bytes,
    pub metadata: HashMap<String, String>,
}

impl BlobData {
    pub fn new<N, C>(name: N, content: C, metadata: HashMap<String, String>) -> Self
    where
        N: Into<String>,
        C: Into<Bytes>,
    {
        BlobData {
            name: name.into(),
            content: content.into(),
            metadata,
        }
    }
}

/// A table row: its two keys plus free-form JSON properties.
#[derive(Clone, Debug, PartialEq)]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    pub properties: Map<String, Value>,
}

impl TableEntity {
    pub fn new<P, R>(partition_key: P, row_key: R) -> Self
    where
        P: Into<String>,
        R: Into<String>,
    {
        TableEntity {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Returns a property only if it holds a string.
    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }
}

/// Position of the next page when listing a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Continuation {
    pub next_partition_key: String,
    // Absent when the next page starts at the beginning of a partition.
    pub next_row_key: Option<String>,
}

impl Continuation {
    pub fn new(next_partition_key: impl Into<String>, next_row_key: Option<String>) -> Self {
        Continuation {
            next_partition_key: next_partition_key.into(),
            next_row_key,
        }
    }
}

/// One page of a table listing.
#[derive(Clone, Debug, Default)]
pub struct EntityPage {
    pub entities: Vec<TableEntity>,
    pub continuation: Option<Continuation>,
}
