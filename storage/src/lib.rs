//! Blob and table storage used by the forwarder.
//!
//! Each concern is a trait with a memory implementation for development and
//! tests, and an Azure implementation that talks to the storage REST API.

pub mod azure;
pub mod blob;
pub mod config;
pub mod error;
pub mod metrics_defs;
pub mod table;
pub mod types;

pub use blob::{BlobStore, MemoryBlobStore};
pub use error::StorageError;
pub use table::{MemoryTableStore, TableStore};
pub use types::{BlobData, Continuation, EntityPage, TableEntity};

use azure::{AzureBlobStore, AzureTableStore, StorageAccount};
use config::{BlobStoreConfig, StoreType, TableStoreConfig};
use std::sync::Arc;
use std::time::Duration;

pub fn get_blob_store(config: &BlobStoreConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    match &config.r#type {
        StoreType::Memory => Ok(Arc::new(MemoryBlobStore::new())),
        StoreType::Azure { connection_string } => {
            let account: StorageAccount = connection_string.parse()?;
            tracing::info!(account = %account.name, container = %config.container, "using azure blob store");
            let timeout = Duration::from_secs(config.timeout_secs);
            Ok(Arc::new(AzureBlobStore::new(account, &config.container, timeout)?))
        }
    }
}

/// Builds the table store. The Azure backend creates the table if needed.
pub async fn get_table_store(
    config: &TableStoreConfig,
) -> Result<Arc<dyn TableStore>, StorageError> {
    match &config.r#type {
        StoreType::Memory => Ok(Arc::new(MemoryTableStore::new())),
        StoreType::Azure { connection_string } => {
            let account: StorageAccount = connection_string.parse()?;
            tracing::info!(account = %account.name, table = %config.table, "using azure table store");
            let timeout = Duration::from_secs(config.timeout_secs);
            Ok(Arc::new(AzureTableStore::connect(account, &config.table, timeout).await?))
        }
    }
}
