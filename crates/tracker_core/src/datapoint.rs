use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Status;

/// Opaque datapoint identity assigned by the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatapointId(pub u64);

impl fmt::Display for DatapointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatapointId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(DatapointId)
    }
}

/// How an extractor renders matched nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionKind {
    #[serde(rename = "TXT")]
    Text,
    #[serde(rename = "HTML")]
    Markup,
}

impl ExtractionKind {
    /// Label used on the batch extraction wire.
    pub fn as_wire(self) -> &'static str {
        match self {
            ExtractionKind::Text => "TXT",
            ExtractionKind::Markup => "HTML",
        }
    }
}

impl fmt::Display for ExtractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Declared value kind. Only `Text` and `Markup` drive extraction; the typed
/// kinds exist for display and are extracted as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueKind {
    #[default]
    Text,
    Markup,
    String,
    Integer,
    Float,
    Date,
    Boolean,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Text => "TXT",
            ValueKind::Markup => "HTML",
            ValueKind::String => "STRING",
            ValueKind::Integer => "INTEGER",
            ValueKind::Float => "FLOAT",
            ValueKind::Date => "DATE",
            ValueKind::Boolean => "BOOLEAN",
        }
    }

    /// The extraction mode, or `None` for display-only kinds.
    pub fn extraction_kind(self) -> Option<ExtractionKind> {
        match self {
            ValueKind::Text => Some(ExtractionKind::Text),
            ValueKind::Markup => Some(ExtractionKind::Markup),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown value kind '{0}'")]
pub struct ParseKindError(pub String);

impl FromStr for ValueKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TXT" | "TEXT" => Ok(ValueKind::Text),
            "HTML" | "MARKUP" => Ok(ValueKind::Markup),
            "STRING" => Ok(ValueKind::String),
            "INTEGER" | "INT" => Ok(ValueKind::Integer),
            "FLOAT" => Ok(ValueKind::Float),
            "DATE" => Ok(ValueKind::Date),
            "BOOLEAN" | "BOOL" => Ok(ValueKind::Boolean),
            _ => Err(ParseKindError(s.to_string())),
        }
    }
}

impl TryFrom<String> for ValueKind {
    type Error = ParseKindError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ValueKind> for String {
    fn from(kind: ValueKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A tracked (URL, selection rule) pair and its reconciliation state.
///
/// `current_verified_data` is the human-accepted baseline and is only ever
/// written by a human action. `current_unverified_data` is the latest scrape
/// output and is only ever written by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datapoint {
    pub id: DatapointId,
    pub name: String,
    pub url: String,
    pub xpath: String,
    pub kind: ValueKind,
    pub status: Status,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub previously_verified_data: Option<String>,
    #[serde(default)]
    pub current_verified_data: Option<String>,
    #[serde(default)]
    pub current_unverified_data: Option<String>,
    #[serde(default)]
    pub last_verified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Store revision used for compare-and-set updates.
    #[serde(default)]
    pub revision: u64,
}

impl Datapoint {
    /// New datapoint in the default `AUTO` status with no captured values.
    pub fn new(
        id: DatapointId,
        name: impl Into<String>,
        url: impl Into<String>,
        xpath: impl Into<String>,
        kind: ValueKind,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
            xpath: xpath.into(),
            kind,
            status: Status::Auto,
            group: None,
            previously_verified_data: None,
            current_verified_data: None,
            current_unverified_data: None,
            last_verified: None,
            last_updated: None,
            revision: 0,
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_verified(mut self, value: impl Into<String>) -> Self {
        self.current_verified_data = Some(value.into());
        self
    }

    pub fn has_locator_and_rule(&self) -> bool {
        !self.url.trim().is_empty() && !self.xpath.trim().is_empty()
    }

    pub fn is_schedulable(&self) -> bool {
        self.status.is_schedulable()
    }
}
