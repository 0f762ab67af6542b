use crate::{DatapointId, ExtractionKind, SkipReason, Status, Transition, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Operator-visible message produced by a scrape cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn for_transition(name: &str, transition: &Transition) -> Self {
        match transition {
            Transition::Unchanged => Self::new(
                NoticeLevel::Success,
                format!("No changes detected for Datapoint: {name}. Status set to AUTO."),
            ),
            Transition::Drifted => Self::new(
                NoticeLevel::Info,
                format!(
                    "Changes detected for Datapoint: {name}. Status set to VERIFY for user verification."
                ),
            ),
            Transition::NoData => Self::no_data(name),
            Transition::Failed { error } => Self::new(
                NoticeLevel::Error,
                format!("Failed to scrape Datapoint: {name}. Error: {error}"),
            ),
        }
    }

    pub fn no_data(name: &str) -> Self {
        Self::new(
            NoticeLevel::Warning,
            format!("No data found for Datapoint: {name}. Status set to FIX."),
        )
    }

    pub fn not_found(url: &str, xpath: &str) -> Self {
        Self::new(
            NoticeLevel::Error,
            format!("Datapoint with URL {url} and XPath {xpath} does not exist."),
        )
    }

    pub fn unknown_datapoint(id: DatapointId) -> Self {
        Self::new(
            NoticeLevel::Error,
            format!("Datapoint #{id} does not exist."),
        )
    }

    pub fn ambiguous(url: &str, xpath: &str, count: usize) -> Self {
        Self::new(
            NoticeLevel::Error,
            format!(
                "{count} Datapoints share URL {url} and XPath {xpath}; the result cannot be attributed."
            ),
        )
    }

    pub fn not_schedulable(name: &str, status: Status) -> Self {
        Self::new(
            NoticeLevel::Warning,
            format!("Datapoint '{name}' is in {status} status and was not updated."),
        )
    }

    pub fn skipped(name: &str, reason: SkipReason) -> Self {
        Self::new(
            NoticeLevel::Warning,
            format!("Datapoint '{name}' skipped: {reason}."),
        )
    }

    pub fn kind_defaulted(name: &str, declared: ValueKind) -> Self {
        Self::new(
            NoticeLevel::Warning,
            format!(
                "Datapoint '{name}' has data type {declared}; extracting as {}.",
                ExtractionKind::Text
            ),
        )
    }

    pub fn nothing_selected(what: &str) -> Self {
        Self::new(
            NoticeLevel::Warning,
            format!("No Datapoints available for scraping ({what})."),
        )
    }

    pub fn no_valid_tasks() -> Self {
        Self::new(
            NoticeLevel::Warning,
            "No valid Datapoints to scrape after validation.",
        )
    }

    pub fn unauthorized(detail: &str) -> Self {
        Self::new(
            NoticeLevel::Error,
            format!("Unauthorized: the scraper service rejected the request ({detail})."),
        )
    }

    pub fn unreachable(detail: &str) -> Self {
        Self::new(
            NoticeLevel::Error,
            format!("Error connecting to the scraper service: {detail}"),
        )
    }

    pub fn service_error(detail: &str) -> Self {
        Self::new(
            NoticeLevel::Error,
            format!("Failed to initiate scraping: {detail}"),
        )
    }

    pub fn invalid_response(detail: &str) -> Self {
        Self::new(
            NoticeLevel::Error,
            format!("Invalid response from the scraper service: {detail}"),
        )
    }

    pub fn store_failure(name: &str, error: &str) -> Self {
        Self::new(
            NoticeLevel::Error,
            format!("Could not save Datapoint '{name}': {error}"),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityOutcome {
    pub id: DatapointId,
    pub name: String,
    pub previous: Status,
    pub status: Status,
    pub transition: Transition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotFound,
    Ambiguous,
    NotSchedulable(Status),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedResult {
    pub url: String,
    pub xpath: String,
    pub reason: DropReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    pub id: DatapointId,
    pub name: String,
    pub error: String,
}

/// Everything one cycle did, for logging and for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub tasks_sent: usize,
    pub skipped: Vec<(DatapointId, SkipReason)>,
    pub outcomes: Vec<EntityOutcome>,
    pub dropped: Vec<DroppedResult>,
    pub failures: Vec<EntityFailure>,
    /// Set when the whole batch failed and nothing was reconciled.
    pub batch_error: Option<String>,
    pub notices: Vec<Notice>,
}

impl CycleReport {
    pub fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn count(&self, status: Status) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    pub fn outcome_for(&self, id: DatapointId) -> Option<&EntityOutcome> {
        self.outcomes.iter().find(|outcome| outcome.id == id)
    }

    pub fn is_aborted(&self) -> bool {
        self.batch_error.is_some()
    }

    pub fn has_errors(&self) -> bool {
        self.notices
            .iter()
            .any(|notice| notice.level == NoticeLevel::Error)
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        if let Some(error) = &self.batch_error {
            return format!("batch failed: {error}");
        }
        format!(
            "sent={} auto={} verify={} fix={} skipped={} dropped={} failures={}",
            self.tasks_sent,
            self.count(Status::Auto),
            self.count(Status::Verify),
            self.count(Status::Fix),
            self.skipped.len(),
            self.dropped.len(),
            self.failures.len()
        )
    }
}
