//! Azure Storage backends speaking the REST API directly.
//!
//! Requests are authorized with Shared Key Lite: an HMAC-SHA256 over a
//! canonical description of the request, keyed with the decoded account key.

mod blob;
mod table;

pub use blob::AzureBlobStore;
pub use table::AzureTableStore;

use crate::error::StorageError;
use crate::metrics_defs::{STORAGE_REQUEST_DURATION, STORAGE_REQUEST_ERRORS};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Instant;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";
const DEV_TABLE_ENDPOINT: &str = "http://127.0.0.1:10002/devstoreaccount1";

/// A storage account parsed from a `Key=Value;...` connection string.
#[derive(Clone)]
pub struct StorageAccount {
    pub name: String,
    key: Vec<u8>,
    pub blob_endpoint: Url,
    pub table_endpoint: Url,
}

impl std::fmt::Debug for StorageAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAccount")
            .field("name", &self.name)
            .field("blob_endpoint", &self.blob_endpoint.as_str())
            .field("table_endpoint", &self.table_endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl FromStr for StorageAccount {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let settings: HashMap<&str, &str> = s
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.split_once('=').ok_or_else(|| {
                    StorageError::InvalidConnectionString(format!("malformed segment {part:?}"))
                })
            })
            .collect::<Result<_, _>>()?;

        if settings
            .get("UseDevelopmentStorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Self::new(
                DEV_ACCOUNT_NAME,
                DEV_ACCOUNT_KEY,
                Url::parse(DEV_BLOB_ENDPOINT)?,
                Url::parse(DEV_TABLE_ENDPOINT)?,
            );
        }

        let require = |key: &str| {
            settings
                .get(key)
                .copied()
                .ok_or_else(|| StorageError::InvalidConnectionString(format!("missing {key}")))
        };

        let name = require("AccountName")?;
        let key = require("AccountKey")?;
        let protocol = settings
            .get("DefaultEndpointsProtocol")
            .copied()
            .unwrap_or("https");
        let suffix = settings
            .get("EndpointSuffix")
            .copied()
            .unwrap_or("core.windows.net");

        let endpoint = |explicit: &str, service: &str| match settings.get(explicit) {
            Some(url) => Url::parse(url),
            None => Url::parse(&format!("{protocol}://{name}.{service}.{suffix}")),
        };

        Self::new(
            name,
            key,
            endpoint("BlobEndpoint", "blob")?,
            endpoint("TableEndpoint", "table")?,
        )
    }
}

impl StorageAccount {
    pub fn new(
        name: &str,
        base64_key: &str,
        blob_endpoint: Url,
        table_endpoint: Url,
    ) -> Result<Self, StorageError> {
        let key = STANDARD.decode(base64_key).map_err(|e| {
            StorageError::InvalidConnectionString(format!("AccountKey is not base64: {e}"))
        })?;

        Ok(StorageAccount {
            name: name.to_string(),
            key,
            blob_endpoint,
            table_endpoint,
        })
    }

    /// Builds the `Authorization` header value for a canonical string.
    fn authorization(&self, string_to_sign: &str) -> Result<String, StorageError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|e| {
            StorageError::InvalidConnectionString(format!("unusable AccountKey: {e}"))
        })?;
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        Ok(format!("SharedKeyLite {}:{signature}", self.name))
    }

    /// `/{account}{encoded path}` as required by both services.
    fn canonical_resource(&self, url: &Url) -> String {
        format!("/{}{}", self.name, url.path())
    }
}

/// Request date in the RFC 1123 form the storage services expect.
fn request_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Appends `segments` to the path of `base`, percent-encoding each one.
fn join_segments<'a>(
    base: &Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, StorageError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| StorageError::InvalidConnectionString(format!("{base} cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn observe<T>(
    service: &'static str,
    operation: &'static str,
    start: Instant,
    result: &Result<T, StorageError>,
) {
    histogram!(STORAGE_REQUEST_DURATION, "service" => service, "operation" => operation)
        .record(start.elapsed().as_secs_f64());
    if result.is_err() {
        counter!(STORAGE_REQUEST_ERRORS, "service" => service, "operation" => operation)
            .increment(1);
    }
}

async fn unexpected_status(response: reqwest::Response) -> StorageError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StorageError::UnexpectedStatus { status, body }
}
