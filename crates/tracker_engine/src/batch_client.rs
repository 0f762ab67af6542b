//! Client for the remote batch extraction service (`POST {base}/scrape/batch`).
use std::time::Duration;

use engine_logging::{engine_error, engine_info, engine_warn, SharedLog};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracker_core::{DatapointId, ExtractionTask, Notice, ResultStatus, ScrapeResult};
use url::Url;

use crate::config::{RetryPolicy, TrackerConfig};

const BATCH_PATH: &str = "scrape/batch";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("unauthorized: {detail}")]
    Unauthorized { detail: String },
    #[error("scraper service returned {status}: {detail}")]
    Service { status: u16, detail: String },
    #[error("scraper service unreachable: {0}")]
    Unreachable(String),
    #[error("scraper service did not answer within {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("remote batch service is not configured: {0}")]
    NotConfigured(String),
}

impl BatchError {
    /// Transport trouble, garbled bodies and server-side errors may clear up;
    /// rejected credentials and bad requests will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            BatchError::Unreachable(_) | BatchError::Timeout(_) | BatchError::Malformed(_) => true,
            BatchError::Service { status, .. } => *status >= 500,
            BatchError::Unauthorized { .. } | BatchError::NotConfigured(_) => false,
        }
    }

    pub fn notice(&self) -> Notice {
        match self {
            BatchError::Unauthorized { detail } => Notice::unauthorized(detail),
            BatchError::Service { detail, .. } => Notice::service_error(detail),
            BatchError::Unreachable(_) | BatchError::Timeout(_) => {
                Notice::unreachable(&self.to_string())
            }
            BatchError::Malformed(detail) => Notice::invalid_response(detail),
            BatchError::NotConfigured(detail) => Notice::service_error(detail),
        }
    }
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    tasks: Vec<WireTask<'a>>,
}

#[derive(Debug, Serialize)]
struct WireTask<'a> {
    url: &'a str,
    xpath: &'a str,
    data_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<DatapointId>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    results: Vec<serde_json::Value>,
}

/// One element of `results`; any field may be missing.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireResult {
    url: Option<String>,
    xpath: Option<String>,
    status: Option<String>,
    scraped_data: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
    id: Option<serde_json::Value>,
}

impl WireResult {
    fn is_addressable(&self) -> bool {
        self.url.is_some() && self.xpath.is_some()
    }

    /// Elements without url or xpath keep empty ones and lose their
    /// correlation id, so reconciliation drops them as unknown.
    fn into_result(self) -> ScrapeResult {
        let addressable = self.is_addressable();
        let status = match self.status.as_deref() {
            Some(status) if status.eq_ignore_ascii_case("success") => ResultStatus::Success,
            _ => ResultStatus::Failed,
        };
        // Correlation ids are best effort; anything unparseable falls back to (url, xpath).
        let correlation = match self.id {
            _ if !addressable => None,
            Some(serde_json::Value::Number(n)) => n.as_u64().map(DatapointId),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        };
        ScrapeResult {
            url: self.url.unwrap_or_default(),
            xpath: self.xpath.unwrap_or_default(),
            status,
            scraped_data: self.scraped_data.and_then(as_text),
            error: self.error.and_then(as_text),
            correlation,
        }
    }
}

fn as_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// Pull `detail` out of an error body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

pub struct RemoteBatchClient {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
    timeout: Duration,
    retry: RetryPolicy,
    log: SharedLog,
}

impl RemoteBatchClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
        log: SharedLog,
    ) -> Result<Self, BatchError> {
        let mut base = Url::parse(base_url)
            .map_err(|err| BatchError::NotConfigured(format!("bad base url '{base_url}': {err}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join(BATCH_PATH)
            .map_err(|err| BatchError::NotConfigured(err.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| BatchError::NotConfigured(err.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            token,
            timeout,
            retry,
            log,
        })
    }

    pub fn from_config(
        config: &TrackerConfig,
        retry: RetryPolicy,
        log: SharedLog,
    ) -> Result<Self, BatchError> {
        Self::new(
            &config.service_base_url,
            config.api_token.clone(),
            config.batch_timeout,
            retry,
            log,
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Submit `tasks` as one batch. Results come back in whatever order the
    /// service produced them.
    pub async fn run(&self, tasks: &[ExtractionTask]) -> Result<Vec<ScrapeResult>, BatchError> {
        let request = BatchRequest {
            tasks: tasks
                .iter()
                .map(|task| WireTask {
                    url: &task.url,
                    xpath: &task.xpath,
                    data_type: task.kind.as_wire(),
                    id: task.correlation,
                })
                .collect(),
        };
        let body = serde_json::to_vec(&request)
            .map_err(|err| BatchError::Malformed(format!("request encoding: {err}")))?;

        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send_once(&body).await {
                Ok(results) => {
                    engine_info!(
                        self.log,
                        "batch of {} tasks returned {} results (attempt {}/{})",
                        tasks.len(),
                        results.len(),
                        attempt,
                        attempts
                    );
                    return Ok(results);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    engine_warn!(
                        self.log,
                        "batch attempt {}/{} failed: {}; retrying in {:?}",
                        attempt,
                        attempts,
                        err,
                        self.retry.delay
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    engine_error!(
                        self.log,
                        "batch of {} tasks to {} failed after {} attempt(s): {}",
                        tasks.len(),
                        self.endpoint,
                        attempt,
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(&self, body: &[u8]) -> Result<Vec<ScrapeResult>, BatchError> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| self.transport_error(err))?;

        if !status.is_success() {
            let detail = error_detail(&text);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    BatchError::Unauthorized { detail }
                }
                _ => BatchError::Service {
                    status: status.as_u16(),
                    detail,
                },
            });
        }

        let parsed: BatchResponse =
            serde_json::from_str(&text).map_err(|err| BatchError::Malformed(err.to_string()))?;
        Ok(parsed
            .results
            .iter()
            .map(|element| self.read_result(element))
            .collect())
    }

    fn read_result(&self, element: &serde_json::Value) -> ScrapeResult {
        let wire = WireResult::deserialize(element).unwrap_or_else(|err| {
            engine_error!(self.log, "unreadable batch result {}: {}", element, err);
            WireResult::default()
        });
        if !wire.is_addressable() {
            engine_error!(self.log, "batch result without url or xpath: {}", element);
        }
        wire.into_result()
    }

    fn transport_error(&self, err: reqwest::Error) -> BatchError {
        if err.is_timeout() {
            BatchError::Timeout(self.timeout)
        } else {
            BatchError::Unreachable(err.to_string())
        }
    }
}
