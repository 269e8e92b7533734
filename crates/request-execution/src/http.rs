//! HTTP transport to the Embrace collector.

use crate::{classify_status, ExecutionError, ExecutionOutcome, ExecutionResult, RequestExecutionService};
use async_trait::async_trait;
use delivery_core::{DeliveryConfig, Endpoint};
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use std::io::{self, Write};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const APP_ID_HEADER: &str = "x-em-aid";
const DEVICE_ID_HEADER: &str = "x-em-did";

/// Settings for [`HttpRequestExecutionService`].
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub base_url: Url,
    pub app_id: String,
    pub device_id: String,
    pub sdk_version: String,
    pub timeout: Duration,
    pub compress: bool,
}

impl ExecutionConfig {
    pub fn from_delivery_config(config: &DeliveryConfig) -> ExecutionResult<Self> {
        Ok(Self {
            base_url: config.base_url()?,
            app_id: config.app_id.clone(),
            device_id: config.device_id.clone(),
            sdk_version: config.sdk_version.clone(),
            timeout: config.request_timeout(),
            compress: config.compress_payloads,
        })
    }

    /// `{base_url}/v2/{endpoint}`
    pub fn endpoint_url(&self, endpoint: Endpoint) -> ExecutionResult<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(&format!("v2/{}", endpoint.path()))?)
    }

    fn default_headers(&self) -> ExecutionResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&format!("Embrace/a/{}", self.sdk_version))
                .map_err(|_| ExecutionError::InvalidHeader("User-Agent"))?,
        );
        headers.insert(
            APP_ID_HEADER,
            HeaderValue::from_str(&self.app_id)
                .map_err(|_| ExecutionError::InvalidHeader(APP_ID_HEADER))?,
        );
        headers.insert(
            DEVICE_ID_HEADER,
            HeaderValue::from_str(&self.device_id)
                .map_err(|_| ExecutionError::InvalidHeader(DEVICE_ID_HEADER))?,
        );
        if self.compress {
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        Ok(headers)
    }
}

/// Gzip `bytes` in memory.
pub fn gzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Sends payloads with `reqwest`. Holds no delivery state.
#[derive(Debug, Clone)]
pub struct HttpRequestExecutionService {
    client: Client,
    config: ExecutionConfig,
}

impl HttpRequestExecutionService {
    pub fn new(config: ExecutionConfig) -> ExecutionResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(config.default_headers()?)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }
}

#[async_trait]
impl RequestExecutionService for HttpRequestExecutionService {
    async fn execute(&self, endpoint: Endpoint, payload: Vec<u8>) -> ExecutionOutcome {
        let url = match self.config.endpoint_url(endpoint) {
            Ok(url) => url,
            Err(err) => return ExecutionOutcome::permanent(format!("invalid endpoint url: {err}")),
        };

        let body = if self.config.compress {
            match gzip(&payload) {
                Ok(compressed) => compressed,
                Err(err) => return ExecutionOutcome::transient(format!("compression failed: {err}")),
            }
        } else {
            payload
        };

        debug!(endpoint = %endpoint, url = %url, bytes = body.len(), "Sending payload");

        let response = match self.client.post(url).body(body).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                warn!(endpoint = %endpoint, "Request timed out");
                return ExecutionOutcome::transient("request timed out");
            }
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "Request failed");
                return ExecutionOutcome::transient(err.to_string());
            }
        };

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok());
        let outcome = classify_status(status, retry_after);
        debug!(endpoint = %endpoint, status, outcome = %outcome, "Collector responded");
        outcome
    }
}
