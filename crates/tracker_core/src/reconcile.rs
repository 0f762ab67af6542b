//! Status state machine.
//!
//! Two mutation paths exist and never share code: [`reconcile`] applies an
//! extraction result, the `verify`/`set_manual`/`release_to_auto` functions
//! apply a human decision.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{Datapoint, ScrapeResult, Status};

/// How a result compares against the accepted baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Extracted value equals the verified baseline.
    Unchanged,
    /// Extracted value differs from the baseline, or no baseline exists.
    Drifted,
    /// The result succeeded but carried no data.
    NoData,
    /// The extractor reported a failure.
    Failed { error: String },
}

impl Transition {
    pub fn target_status(&self) -> Status {
        match self {
            Transition::Unchanged => Status::Auto,
            Transition::Drifted => Status::Verify,
            Transition::NoData | Transition::Failed { .. } => Status::Fix,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("datapoint {id} is {status} and cannot be reconciled")]
    NotSchedulable { id: crate::DatapointId, status: Status },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub datapoint: Datapoint,
    pub transition: Transition,
}

pub fn classify(datapoint: &Datapoint, result: &ScrapeResult) -> Transition {
    if !result.is_success() {
        return Transition::Failed {
            error: result
                .error
                .clone()
                .unwrap_or_else(|| "unknown extraction error".to_string()),
        };
    }
    match result.extracted_value() {
        None => Transition::NoData,
        Some(value) if datapoint.current_verified_data.as_deref() == Some(value) => {
            Transition::Unchanged
        }
        Some(_) => Transition::Drifted,
    }
}

/// Applies one result to one datapoint.
///
/// On success `current_unverified_data`, `last_verified` and `last_updated`
/// move; on failure only the status and `last_updated` do. The verified
/// baseline is never touched here.
pub fn reconcile(
    datapoint: &Datapoint,
    result: &ScrapeResult,
    now: DateTime<Utc>,
) -> Result<Reconciled, ReconcileError> {
    if !datapoint.is_schedulable() {
        return Err(ReconcileError::NotSchedulable {
            id: datapoint.id,
            status: datapoint.status,
        });
    }

    let transition = classify(datapoint, result);
    let mut next = datapoint.clone();
    next.status = transition.target_status();
    next.last_updated = Some(now);
    if let (Transition::Unchanged | Transition::Drifted, Some(value)) =
        (&transition, result.extracted_value())
    {
        next.current_unverified_data = Some(value.to_string());
        next.last_verified = Some(now);
    }

    Ok(Reconciled {
        datapoint: next,
        transition,
    })
}

/// Human confirmation: accept the pending value and return to `AUTO`.
pub fn verify(datapoint: &Datapoint, now: DateTime<Utc>) -> Datapoint {
    let mut next = datapoint.clone();
    if let Some(pending) = next.current_unverified_data.clone() {
        if next.current_verified_data.as_deref() != Some(pending.as_str()) {
            next.previously_verified_data = next.current_verified_data.take();
            next.current_verified_data = Some(pending);
        }
    }
    next.status = Status::Auto;
    next.last_verified = Some(now);
    next
}

/// A human takes ownership, optionally recording the value they vouch for.
pub fn set_manual(datapoint: &Datapoint, value: Option<String>, now: DateTime<Utc>) -> Datapoint {
    let mut next = datapoint.clone();
    if let Some(value) = value {
        if next.current_verified_data.as_deref() != Some(value.as_str()) {
            next.previously_verified_data = next.current_verified_data.take();
            next.current_verified_data = Some(value);
        }
        next.last_verified = Some(now);
    }
    next.status = Status::Manual;
    next
}

/// Hands a manual datapoint back to automated extraction.
pub fn release_to_auto(datapoint: &Datapoint) -> Datapoint {
    let mut next = datapoint.clone();
    next.status = Status::Auto;
    next
}
