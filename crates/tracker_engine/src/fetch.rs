//! Page download for local extraction: one GET per datapoint, bounded in
//! time, redirect hops and size, and limited to markup.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::{Response, Url};

use crate::{ExtractError, FailureKind, FetchMetadata, FetchOutput};

/// Media types a selection rule can be evaluated against.
const MARKUP_TYPES: [&str; 4] = [
    "text/html",
    "application/xhtml+xml",
    "application/xml",
    "text/xml",
];

const ACCEPT_MARKUP: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.5";

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    /// Navigation budget: the whole request, redirects and body included.
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 5 * 1024 * 1024,
            allowed_content_types: MARKUP_TYPES.iter().map(|t| t.to_string()).collect(),
            user_agent: concat!("datapoint-tracker/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchSettings {
    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = self.connect_timeout.min(timeout);
        self.request_timeout = timeout;
        self
    }

    /// Parameters such as `charset` are ignored.
    fn accepts(&self, content_type: &str) -> bool {
        let essence = media_essence(content_type);
        self.allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(essence))
    }

    fn oversized(&self, actual: u64) -> ExtractError {
        ExtractError::new(
            FailureKind::TooLarge {
                max_bytes: self.max_bytes,
                actual: Some(actual),
            },
            format!("page is larger than {} bytes", self.max_bytes),
        )
    }
}

fn media_essence(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchOutput, ExtractError>;
}

/// Counts the hops of one page load and stops following at the limit.
#[derive(Debug, Clone)]
struct RedirectBudget {
    limit: usize,
    hops: Arc<AtomicUsize>,
}

impl RedirectBudget {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            hops: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn policy(&self) -> Policy {
        let budget = self.clone();
        Policy::custom(move |attempt| {
            let hops = attempt.previous().len();
            budget.hops.store(hops, Ordering::Relaxed);
            if hops >= budget.limit {
                attempt.error(format!("more than {} redirects", budget.limit))
            } else {
                attempt.follow()
            }
        })
    }

    fn used(&self) -> usize {
        self.hops.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    fn client(&self, redirects: &RedirectBudget) -> Result<reqwest::Client, ExtractError> {
        reqwest::Client::builder()
            .user_agent(self.settings.user_agent.as_str())
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .redirect(redirects.policy())
            .build()
            .map_err(|err| ExtractError::new(FailureKind::Network, err.to_string()))
    }

    /// Status, declared length and media type, checked before the body is read.
    /// Returns the content type when the page sent one.
    fn admit(&self, response: &Response) -> Result<Option<String>, ExtractError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::new(
                FailureKind::HttpStatus(status.as_u16()),
                format!("page answered {status}"),
            ));
        }
        if let Some(declared) = response
            .content_length()
            .filter(|len| *len > self.settings.max_bytes)
        {
            return Err(self.settings.oversized(declared));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        match content_type.as_deref() {
            Some(found) if !self.settings.accepts(found) => Err(ExtractError::new(
                FailureKind::UnsupportedContentType {
                    content_type: found.to_string(),
                },
                "page is not markup",
            )),
            _ => Ok(content_type),
        }
    }

    /// Content-Length may be absent or wrong; the cap holds while streaming.
    async fn read_body(&self, response: Response) -> Result<Vec<u8>, ExtractError> {
        let mut body = Vec::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(load_error)?;
            let received = (body.len() + chunk.len()) as u64;
            if received > self.settings.max_bytes {
                return Err(self.settings.oversized(received));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutput, ExtractError> {
        let page = page_url(url)?;
        let redirects = RedirectBudget::new(self.settings.redirect_limit);
        let response = self
            .client(&redirects)?
            .get(page)
            .header(ACCEPT, ACCEPT_MARKUP)
            .send()
            .await
            .map_err(load_error)?;

        let content_type = self.admit(&response)?;
        let final_url = response.url().to_string();
        let bytes = self.read_body(response).await?;

        Ok(FetchOutput {
            metadata: FetchMetadata {
                original_url: url.to_string(),
                final_url,
                redirect_count: redirects.used(),
                content_type,
                byte_len: bytes.len() as u64,
            },
            bytes,
        })
    }
}

/// Datapoints only point at web pages.
fn page_url(raw: &str) -> Result<Url, ExtractError> {
    let url = Url::parse(raw)
        .map_err(|err| ExtractError::new(FailureKind::InvalidUrl, format!("'{raw}': {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ExtractError::new(
            FailureKind::InvalidUrl,
            format!("cannot load '{other}' pages"),
        )),
    }
}

fn load_error(err: reqwest::Error) -> ExtractError {
    let kind = if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_redirect() {
        FailureKind::RedirectLimitExceeded
    } else {
        FailureKind::Network
    };
    ExtractError::new(kind, err.to_string())
}
