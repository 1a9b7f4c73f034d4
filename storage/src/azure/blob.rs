use super::{StorageAccount, join_segments, observe, request_date, unexpected_status};
use crate::blob::BlobStore;
use crate::error::StorageError;
use crate::types::BlobData;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const API_VERSION: &str = "2021-12-02";
const METADATA_PREFIX: &str = "x-ms-meta-";

/// Reads blobs from one container of an Azure storage account.
pub struct AzureBlobStore {
    client: reqwest::Client,
    account: StorageAccount,
    container: String,
}

impl AzureBlobStore {
    pub fn new(
        account: StorageAccount,
        container: &str,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        Ok(AzureBlobStore {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            account,
            container: container.to_string(),
        })
    }

    async fn get(&self, name: &str) -> Result<Option<BlobData>, StorageError> {
        let url = join_segments(&self.account.blob_endpoint, [self.container.as_str(), name])?;
        let date = request_date();
        let string_to_sign = format!(
            "GET\n\n\n\nx-ms-date:{date}\nx-ms-version:{API_VERSION}\n{}",
            self.account.canonical_resource(&url)
        );

        let response = self
            .client
            .get(url)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header(AUTHORIZATION, self.account.authorization(&string_to_sign)?)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let metadata: HashMap<String, String> = response
                    .headers()
                    .iter()
                    .filter_map(|(header, value)| {
                        let key = header.as_str().strip_prefix(METADATA_PREFIX)?;
                        let value = value.to_str().ok()?;
                        Some((key.to_string(), value.to_string()))
                    })
                    .collect();
                let content = response.bytes().await?;
                Ok(Some(BlobData::new(name, content, metadata)))
            }
            _ => Err(unexpected_status(response).await),
        }
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn fetch(&self, name: &str) -> Result<Option<BlobData>, StorageError> {
        let start = Instant::now();
        let result = self.get(name).await;
        observe("blob", "fetch", start, &result);
        if let Err(e) = &result {
            tracing::warn!(container = %self.container, blob = name, error = %e, "blob fetch failed");
        }
        result
    }
}
