use std::fmt;

use tracker_core::{CycleReport, DatapointId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Decoding,
    Evaluating,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    CycleCompleted { job: JobLabel, report: CycleReport },
}

/// What a background job was asked to do, echoed back with its report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobLabel {
    Scrape(DatapointId),
    Batch(String),
}

impl fmt::Display for JobLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobLabel::Scrape(id) => write!(f, "scrape #{id}"),
            JobLabel::Batch(selection) => write!(f, "batch ({selection})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub bytes: Vec<u8>,
    pub metadata: FetchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub original_url: String,
    pub final_url: String,
    pub redirect_count: usize,
    pub content_type: Option<String>,
    pub byte_len: u64,
}

/// Why a single extraction produced no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractError {
    pub kind: FailureKind,
    pub message: String,
}

impl ExtractError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn no_match() -> Self {
        Self::new(FailureKind::NoMatch, NO_MATCH_MESSAGE)
    }
}

/// Error text reported when a rule selects nothing; the batch service uses the same wording.
pub const NO_MATCH_MESSAGE: &str = "No content found at the provided XPath.";

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::NoMatch => f.write_str(&self.message),
            _ => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ExtractError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    InvalidRule,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    ProcessingTimeout { stage: Stage },
    Decode,
    NoMatch,
    ProcessingError,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::InvalidRule => write!(f, "invalid xpath"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::ProcessingTimeout { stage } => {
                write!(f, "processing timeout at stage {stage:?}")
            }
            FailureKind::Decode => write!(f, "decode error"),
            FailureKind::NoMatch => write!(f, "no match"),
            FailureKind::ProcessingError => write!(f, "processing error"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}
