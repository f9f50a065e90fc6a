use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::error::EtlError;

pub const DEFAULT_BASE_URL: &str = "https://data.gov.il/api/3/action/datastore_search";

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub result: SearchResult,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResult {
    pub total: u64,
    #[serde(default)]
    pub records: Vec<Map<String, JsonValue>>,
}

/// One page of a remote resource.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(
        &self,
        resource_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<SearchResult, EtlError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_ms(&self, attempt: u32, err: &EtlError) -> u64 {
        let base = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let computed = base.min(self.max_backoff_ms as f64) as u64;
        match err {
            EtlError::RateLimited {
                retry_after_secs: Some(secs),
            } => computed.max(secs * 1000),
            _ => computed,
        }
    }
}

/// Connection problems (including a body cut off mid-read), timeouts, 429 and
/// the usual gateway 5xx codes.
pub fn is_retryable(err: &EtlError) -> bool {
    match err {
        EtlError::RateLimited { .. } => true,
        EtlError::HttpError { status, .. } => matches!(status, 500 | 502 | 503 | 504),
        EtlError::Transport(e) => {
            e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode()
        }
        _ => false,
    }
}

pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T, EtlError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, EtlError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt >= policy.max_retries {
                    return Err(e);
                }

                let backoff_ms = policy.backoff_ms(attempt, &e);
                warn!(
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// `datastore_search` client. The underlying reqwest client (and its
/// connection pool) is shared by every page of every resource.
#[derive(Debug, Clone)]
pub struct DatastoreClient {
    client: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
}

impl DatastoreClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self, EtlError> {
        let base_url = Url::parse(base_url).map_err(|e| EtlError::ConfigError {
            message: format!("Invalid datastore URL '{}': {}", base_url, e),
        })?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EtlError::ConfigError {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            retry,
        })
    }

    async fn fetch_once(
        &self,
        resource_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<SearchResult, EtlError> {
        let response = self
            .client
            .get(self.base_url.clone())
            .query(&[
                ("resource_id", resource_id.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(EtlError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(EtlError::HttpError {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        let body = response.text().await?;
        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| EtlError::MalformedResponse {
                message: format!("resource {} at offset {}: {}", resource_id, offset, e),
            })?;
        Ok(parsed.result)
    }
}

#[async_trait]
impl PageSource for DatastoreClient {
    async fn fetch_page(
        &self,
        resource_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<SearchResult, EtlError> {
        with_retry(&self.retry, || self.fetch_once(resource_id, limit, offset)).await
    }
}
