use crate::error::StorageError;
use crate::types::BlobData;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Read access to the container holding the flow files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Loads a blob with its metadata. `Ok(None)` if it does not exist.
    async fn fetch(&self, name: &str) -> Result<Option<BlobData>, StorageError>;
}

/// Process-local blob store. Used for development and tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, BlobData>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, blob: BlobData) {
        self.blobs.write().insert(blob.name.clone(), blob);
    }

    pub fn remove(&self, name: &str) -> Option<BlobData> {
        self.blobs.write().remove(name)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, name: &str) -> Result<Option<BlobData>, StorageError> {
        Ok(self.blobs.read().get(name).cloned())
    }
}
