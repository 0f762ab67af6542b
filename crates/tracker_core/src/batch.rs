use std::fmt;

use crate::{Datapoint, DatapointId, ExtractionKind, ExtractionTask, ValueKind};

/// Why a datapoint was left out of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingLocatorOrRule,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::MissingLocatorOrRule => "missing locator or rule",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A display-only kind was replaced with `Text` for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindWarning {
    pub id: DatapointId,
    pub name: String,
    pub declared: ValueKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchPlan {
    pub tasks: Vec<ExtractionTask>,
    pub skipped: Vec<(Datapoint, SkipReason)>,
    pub warnings: Vec<KindWarning>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Turns a working set into extraction tasks.
///
/// Input order is preserved and nothing is deduplicated: two datapoints with
/// the same (url, xpath) pair produce two tasks, and result attribution for
/// them relies on the correlation id.
pub fn build_batch(datapoints: &[Datapoint]) -> BatchPlan {
    let mut plan = BatchPlan::default();
    for datapoint in datapoints {
        if !datapoint.has_locator_and_rule() {
            plan.skipped
                .push((datapoint.clone(), SkipReason::MissingLocatorOrRule));
            continue;
        }

        let kind = match datapoint.kind.extraction_kind() {
            Some(kind) => kind,
            None => {
                plan.warnings.push(KindWarning {
                    id: datapoint.id,
                    name: datapoint.name.clone(),
                    declared: datapoint.kind,
                });
                ExtractionKind::Text
            }
        };

        plan.tasks.push(
            ExtractionTask::new(datapoint.url.clone(), datapoint.xpath.clone(), kind)
                .with_correlation(datapoint.id),
        );
    }
    plan
}
