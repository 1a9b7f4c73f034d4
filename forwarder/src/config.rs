use crate::codec::PayloadForm;
use serde::Deserialize;
use std::fmt;
use storage::config::{BlobStoreConfig, TableStoreConfig};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Listener and admin listener both bind {0}")]
    ListenerConflict(String),

    #[error("Downstream API key is empty")]
    EmptyApiKey,

    #[error("Downstream URL must be http or https, got {0}")]
    UnsupportedScheme(String),

    #[error("Minimum retry interval ({min}s) exceeds maximum retry interval ({max}s)")]
    InvalidRetryInterval { min: u64, max: u64 },

    #[error("Downstream timeout cannot be 0")]
    InvalidTimeout,

    #[error("Storage timeout of {0} cannot be 0")]
    InvalidStorageTimeout(&'static str),
}

/// Forwarder configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for trigger events and retry requests
    #[serde(default = "Listener::main")]
    pub listener: Listener,
    /// Listener for health and readiness probes
    #[serde(default = "Listener::admin")]
    pub admin_listener: Listener,
    /// The conversion API flows are forwarded to
    pub downstream: DownstreamConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Container the flow files are read from on manual and bulk retries
    #[serde(default = "BlobStoreConfig::memory")]
    pub blob_store: BlobStoreConfig,
    /// Table holding one row per delivery that exhausted its retries
    #[serde(default = "TableStoreConfig::memory")]
    pub dead_letter: TableStoreConfig,
}

impl Config {
    /// Validates the forwarder configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        if self.listener == self.admin_listener {
            return Err(ValidationError::ListenerConflict(format!(
                "{}:{}",
                self.listener.host, self.listener.port
            )));
        }

        self.downstream.validate()?;
        self.retry.validate()?;
        if self.blob_store.timeout_secs == 0 {
            return Err(ValidationError::InvalidStorageTimeout("blob_store"));
        }
        if self.dead_letter.timeout_secs == 0 {
            return Err(ValidationError::InvalidStorageTimeout("dead_letter"));
        }
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    fn main() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }

    fn admin() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8081,
        }
    }

    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_conversion_path() -> String {
    "/convert/fdr3".into()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Clone, Deserialize, PartialEq)]
pub struct DownstreamConfig {
    /// Base URL of the FdR1 API, e.g. `https://api.platform.pagopa.it/fdr-legacy/service/v1`
    pub base_url: Url,
    /// Appended to `base_url`. Some deployments expose `/conversion/fdr3`.
    #[serde(default = "default_conversion_path")]
    pub path: String,
    /// Sent as `Ocp-Apim-Subscription-Key`
    pub api_key: String,
    #[serde(default)]
    pub payload_form: PayloadForm,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl fmt::Debug for DownstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownstreamConfig")
            .field("base_url", &self.base_url.as_str())
            .field("path", &self.path)
            .field("api_key", &"<redacted>")
            .field("payload_form", &self.payload_form)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl DownstreamConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(ValidationError::UnsupportedScheme(
                self.base_url.scheme().to_string(),
            ));
        }
        if self.api_key.trim().is_empty() {
            return Err(ValidationError::EmptyApiKey);
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

/// Retry context given to deliveries started from the retry endpoints
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ManualRetry {
    /// No retry context: a failure is reported but never dead-lettered again.
    #[default]
    Detached,
    /// Treated as the last attempt: a failure rewrites the dead-letter row
    /// and raises an alert.
    FinalAttempt,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry index (zero-based) from which a failure is terminal
    pub max_retry_count: u32,
    /// Lower bound of the backoff hint returned to the runtime
    pub minimum_interval_secs: u64,
    /// Upper bound of the backoff hint returned to the runtime
    pub maximum_interval_secs: u64,
    pub manual_retry: ManualRetry,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retry_count: 4,
            minimum_interval_secs: 10,
            maximum_interval_secs: 300,
            manual_retry: ManualRetry::Detached,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.minimum_interval_secs > self.maximum_interval_secs {
            return Err(ValidationError::InvalidRetryInterval {
                min: self.minimum_interval_secs,
                max: self.maximum_interval_secs,
            });
        }
        Ok(())
    }
}
