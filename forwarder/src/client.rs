use crate::codec::EncodedPayload;
use crate::config::DownstreamConfig;
use crate::errors::{DeliveryError, ForwarderError};
use crate::metrics_defs::DOWNSTREAM_REQUEST_DURATION;
use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use shared::histogram;
use std::time::{Duration, Instant};
use url::Url;

pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// The conversion API. One call per delivery attempt, never retried here.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn send(&self, api_key: &str, payload: EncodedPayload) -> Result<(), DeliveryError>;
}

pub struct ConversionClient {
    client: reqwest::Client,
    url: Url,
}

impl ConversionClient {
    pub fn new(config: &DownstreamConfig) -> Result<Self, ForwarderError> {
        let url = Url::parse(&format!(
            "{}/{}",
            config.base_url.as_str().trim_end_matches('/'),
            config.path.trim_start_matches('/')
        ))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(ConversionClient { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Downstream for ConversionClient {
    async fn send(&self, api_key: &str, payload: EncodedPayload) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(SUBSCRIPTION_KEY_HEADER, api_key)
            .header(CONTENT_TYPE, payload.content_type);
        if let Some(encoding) = payload.content_encoding {
            request = request.header(CONTENT_ENCODING, encoding);
        }

        let start = Instant::now();
        let result = request.body(payload.body).send().await;
        histogram!(DOWNSTREAM_REQUEST_DURATION).record(start.elapsed().as_secs_f64());

        let response = result?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Http {
            status: status.as_u16(),
            body,
        })
    }
}
