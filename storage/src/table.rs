use crate::error::StorageError;
use crate::types::{Continuation, EntityPage, TableEntity};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Rows are addressed by (partition key, row key).
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Inserts the entity, replacing any row with the same keys.
    async fn upsert(&self, entity: TableEntity) -> Result<(), StorageError>;

    /// Deletes a row. Deleting a row that does not exist succeeds.
    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<(), StorageError>;

    /// Returns one page of rows, starting at `continuation` if given.
    async fn list_page(
        &self,
        continuation: Option<&Continuation>,
    ) -> Result<EntityPage, StorageError>;

    /// Returns every row whose string property `property` equals `value`.
    async fn find(&self, property: &str, value: &str) -> Result<Vec<TableEntity>, StorageError>;
}

/// Keys may not contain these characters in the table service either, so the
/// memory store rejects them too to keep both backends interchangeable.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = key
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '#' | '?') || c.is_control());
    match invalid {
        true => Err(StorageError::InvalidKey(key.to_string())),
        false => Ok(()),
    }
}

const DEFAULT_PAGE_SIZE: usize = 1000;

type Key = (String, String);

/// Process-local table ordered by (partition key, row key).
pub struct MemoryTableStore {
    rows: RwLock<BTreeMap<Key, TableEntity>>,
    page_size: usize,
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        MemoryTableStore {
            rows: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn get(&self, partition_key: &str, row_key: &str) -> Option<TableEntity> {
        self.rows
            .read()
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn upsert(&self, entity: TableEntity) -> Result<(), StorageError> {
        validate_key(&entity.partition_key)?;
        validate_key(&entity.row_key)?;

        let key = (entity.partition_key.clone(), entity.row_key.clone());
        self.rows.write().insert(key, entity);
        Ok(())
    }

    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<(), StorageError> {
        self.rows
            .write()
            .remove(&(partition_key.to_string(), row_key.to_string()));
        Ok(())
    }

    async fn list_page(
        &self,
        continuation: Option<&Continuation>,
    ) -> Result<EntityPage, StorageError> {
        let rows = self.rows.read();

        let start = match continuation {
            Some(c) => Bound::Included((
                c.next_partition_key.clone(),
                c.next_row_key.clone().unwrap_or_default(),
            )),
            None => Bound::Unbounded,
        };

        let mut iter = rows.range((start, Bound::Unbounded));
        let entities: Vec<TableEntity> = iter
            .by_ref()
            .take(self.page_size)
            .map(|(_, entity)| entity.clone())
            .collect();

        let continuation = iter
            .next()
            .map(|((pk, rk), _)| Continuation::new(pk.clone(), Some(rk.clone())));

        Ok(EntityPage {
            entities,
            continuation,
        })
    }

    async fn find(&self, property: &str, value: &str) -> Result<Vec<TableEntity>, StorageError> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|entity| entity.property_str(property) == Some(value))
            .cloned()
            .collect())
    }
}
