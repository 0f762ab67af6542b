use crate::{DatapointId, ExtractionKind};

/// Results are attributed to tasks by this (url, xpath) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub url: String,
    pub xpath: String,
}

impl TaskKey {
    pub fn new(url: impl Into<String>, xpath: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            xpath: xpath.into(),
        }
    }
}

/// One pending extraction. Lives for a single dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionTask {
    pub url: String,
    pub xpath: String,
    pub kind: ExtractionKind,
    /// Opaque passthrough that lets an echoing backend disambiguate
    /// datapoints sharing the same (url, xpath) pair.
    pub correlation: Option<DatapointId>,
}

impl ExtractionTask {
    pub fn new(url: impl Into<String>, xpath: impl Into<String>, kind: ExtractionKind) -> Self {
        Self {
            url: url.into(),
            xpath: xpath.into(),
            kind,
            correlation: None,
        }
    }

    pub fn with_correlation(mut self, id: DatapointId) -> Self {
        self.correlation = Some(id);
        self
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.url.clone(), self.xpath.clone())
    }

    /// A task with an empty locator or rule cannot be executed at all.
    pub fn is_well_formed(&self) -> bool {
        !self.url.trim().is_empty() && !self.xpath.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Success,
    Failed,
}

/// Outcome of executing one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeResult {
    pub url: String,
    pub xpath: String,
    pub status: ResultStatus,
    pub scraped_data: Option<String>,
    pub error: Option<String>,
    pub correlation: Option<DatapointId>,
}

impl ScrapeResult {
    pub fn success(task: &ExtractionTask, value: impl Into<String>) -> Self {
        Self {
            url: task.url.clone(),
            xpath: task.xpath.clone(),
            status: ResultStatus::Success,
            scraped_data: Some(value.into()),
            error: None,
            correlation: task.correlation,
        }
    }

    pub fn failure(task: &ExtractionTask, error: impl Into<String>) -> Self {
        Self {
            url: task.url.clone(),
            xpath: task.xpath.clone(),
            status: ResultStatus::Failed,
            scraped_data: None,
            error: Some(error.into()),
            correlation: task.correlation,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.url.clone(), self.xpath.clone())
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// The extracted value when the result succeeded with non-blank data.
    pub fn extracted_value(&self) -> Option<&str> {
        if !self.is_success() {
            return None;
        }
        self.scraped_data
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }
}
