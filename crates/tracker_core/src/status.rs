use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reconciliation status of a tracked datapoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Automated; eligible for scheduled re-extraction.
    #[default]
    Auto,
    /// Human-owned; never auto-scheduled.
    Manual,
    /// Change detected, awaiting human confirmation.
    Verify,
    /// Extraction failed or produced no data.
    Fix,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Auto, Status::Manual, Status::Verify, Status::Fix];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Auto => "AUTO",
            Status::Manual => "MANUAL",
            Status::Verify => "VERIFY",
            Status::Fix => "FIX",
        }
    }

    /// Human-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Status::Auto => "Automated",
            Status::Manual => "Manual",
            Status::Verify => "Verification Required",
            Status::Fix => "Fix Needed",
        }
    }

    /// Only AUTO, VERIFY and FIX entities may be sent for extraction.
    pub fn is_schedulable(self) -> bool {
        !matches!(self, Status::Manual)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("verify".parse::<Status>().unwrap(), Status::Verify);
        assert_eq!(" FIX ".parse::<Status>().unwrap(), Status::Fix);
        assert!("VERIFIED".parse::<Status>().is_err());
    }

    #[test]
    fn manual_is_the_only_unschedulable_state() {
        let schedulable: Vec<_> = Status::ALL
            .into_iter()
            .filter(|s| s.is_schedulable())
            .collect();
        assert_eq!(schedulable, vec![Status::Auto, Status::Verify, Status::Fix]);
    }
}
