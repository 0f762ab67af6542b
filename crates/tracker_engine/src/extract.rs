use std::sync::Arc;
use std::time::Duration;

use engine_logging::{engine_debug, SharedLog};
use scraper::Html;
use tracker_core::ExtractionKind;

use crate::config::ExtractionProfile;
use crate::decode::decode_page;
use crate::fetch::{Fetcher, ReqwestFetcher};
use crate::xpath::{XPath, XPathError};
use crate::{ExtractError, FailureKind, Stage};

/// Fetches a document and evaluates a selection rule against it.
///
/// `Ok` always carries a non-empty value; an empty selection is reported as
/// [`FailureKind::NoMatch`].
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        url: &str,
        rule: &str,
        kind: ExtractionKind,
    ) -> Result<String, ExtractError>;
}

/// Evaluate `rule` over an already decoded document.
pub fn extract_from_html(
    html: &str,
    rule: &str,
    kind: ExtractionKind,
) -> Result<Option<String>, XPathError> {
    let xpath = XPath::parse(rule)?;
    let document = Html::parse_document(html);
    Ok(xpath.render(&document, kind))
}

pub struct HttpXPathExtractor {
    fetcher: Arc<dyn Fetcher>,
    wait_timeout: Duration,
    log: SharedLog,
}

impl HttpXPathExtractor {
    pub fn new(profile: &ExtractionProfile, log: SharedLog) -> Self {
        Self::with_fetcher(
            Arc::new(ReqwestFetcher::new(profile.fetch_settings())),
            profile.wait_timeout,
            log,
        )
    }

    pub fn with_fetcher(fetcher: Arc<dyn Fetcher>, wait_timeout: Duration, log: SharedLog) -> Self {
        Self {
            fetcher,
            wait_timeout,
            log,
        }
    }
}

#[async_trait::async_trait]
impl Extractor for HttpXPathExtractor {
    async fn extract(
        &self,
        url: &str,
        rule: &str,
        kind: ExtractionKind,
    ) -> Result<String, ExtractError> {
        let xpath = XPath::parse(rule)
            .map_err(|err| ExtractError::new(FailureKind::InvalidRule, err.reason))?;

        let output = self.fetcher.fetch(url).await?;
        let page = decode_page(&output.bytes, output.metadata.content_type.as_deref())
            .map_err(|err| ExtractError::new(FailureKind::Decode, err.to_string()))?;
        engine_debug!(
            self.log,
            "fetched {} ({} bytes, {}, {} redirects)",
            output.metadata.final_url,
            output.metadata.byte_len,
            page.encoding_label,
            output.metadata.redirect_count
        );

        // The parsed tree is not Send; build and query it on the blocking pool.
        let evaluation =
            tokio::task::spawn_blocking(move || xpath.render(&Html::parse_document(&page.html), kind));
        let rendered = tokio::time::timeout(self.wait_timeout, evaluation)
            .await
            .map_err(|_| {
                ExtractError::new(
                    FailureKind::ProcessingTimeout {
                        stage: Stage::Evaluating,
                    },
                    format!("rule not evaluated within {:?}", self.wait_timeout),
                )
            })?
            .map_err(|err| ExtractError::new(FailureKind::ProcessingError, err.to_string()))?;

        rendered.ok_or_else(ExtractError::no_match)
    }
}
