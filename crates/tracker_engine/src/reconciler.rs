use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use engine_logging::{engine_error, engine_info, engine_warn, SharedLog};
use tracker_core::{
    reconcile, CycleReport, Datapoint, DatapointId, DropReason, DroppedResult, EntityFailure,
    EntityOutcome, Notice, ReconcileError, ScrapeResult, TaskKey,
};

use crate::store::{DatapointStore, StoreError};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

enum Resolution {
    One(DatapointId),
    NotFound,
    Ambiguous(usize),
}

/// Maps results back to the datapoints a batch was built from.
struct ResultIndex {
    by_id: HashMap<DatapointId, TaskKey>,
    by_key: HashMap<TaskKey, Vec<DatapointId>>,
}

impl ResultIndex {
    fn new(working_set: &[Datapoint]) -> Self {
        let mut by_id = HashMap::new();
        let mut by_key: HashMap<TaskKey, Vec<DatapointId>> = HashMap::new();
        let mut seen = HashSet::new();
        for dp in working_set {
            if !seen.insert(dp.id) {
                continue;
            }
            let key = TaskKey::new(dp.url.clone(), dp.xpath.clone());
            by_id.insert(dp.id, key.clone());
            by_key.entry(key).or_default().push(dp.id);
        }
        Self { by_id, by_key }
    }

    fn resolve(&self, result: &ScrapeResult) -> Resolution {
        let key = result.key();
        if let Some(id) = result.correlation {
            if self.by_id.get(&id) == Some(&key) {
                return Resolution::One(id);
            }
        }
        match self.by_key.get(&key).map(Vec::as_slice) {
            None | Some([]) => Resolution::NotFound,
            Some([id]) => Resolution::One(*id),
            Some(ids) => Resolution::Ambiguous(ids.len()),
        }
    }
}

/// Applies results to the store, one entity at a time.
///
/// A failure to attribute or persist one result never stops the others.
pub struct Reconciler {
    store: Arc<dyn DatapointStore>,
    clock: Clock,
    log: SharedLog,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DatapointStore>, clock: Clock, log: SharedLog) -> Self {
        Self { store, clock, log }
    }

    pub async fn apply(
        &self,
        working_set: &[Datapoint],
        results: Vec<ScrapeResult>,
        report: &mut CycleReport,
    ) {
        let index = ResultIndex::new(working_set);
        for result in results {
            match index.resolve(&result) {
                Resolution::One(id) => self.apply_one(id, &result, report).await,
                Resolution::NotFound => {
                    engine_error!(
                        self.log,
                        "no datapoint for url {} and xpath {}",
                        result.url,
                        result.xpath
                    );
                    drop_result(report, &result, DropReason::NotFound);
                    report.notify(Notice::not_found(&result.url, &result.xpath));
                }
                Resolution::Ambiguous(count) => {
                    engine_error!(
                        self.log,
                        "{} datapoints share url {} and xpath {}; result dropped",
                        count,
                        result.url,
                        result.xpath
                    );
                    drop_result(report, &result, DropReason::Ambiguous);
                    report.notify(Notice::ambiguous(&result.url, &result.xpath, count));
                }
            }
        }
    }

    async fn apply_one(&self, id: DatapointId, result: &ScrapeResult, report: &mut CycleReport) {
        // Re-read so the comparison and the CAS both see the latest stored state.
        let current = match self.store.get(id).await {
            Ok(dp) => dp,
            Err(StoreError::NotFound(_)) => {
                engine_error!(self.log, "datapoint #{} vanished before reconciliation", id);
                drop_result(report, result, DropReason::NotFound);
                report.notify(Notice::not_found(&result.url, &result.xpath));
                return;
            }
            Err(err) => {
                self.record_failure(report, id, &format!("#{id}"), &err);
                return;
            }
        };

        let reconciled = match reconcile(&current, result, (self.clock)()) {
            Ok(reconciled) => reconciled,
            Err(ReconcileError::NotSchedulable { status, .. }) => {
                engine_warn!(
                    self.log,
                    "datapoint #{} is {} and was left untouched",
                    id,
                    status
                );
                drop_result(report, result, DropReason::NotSchedulable(status));
                report.notify(Notice::not_schedulable(&current.name, status));
                return;
            }
        };

        match self.store.update(&reconciled.datapoint).await {
            Ok(saved) => {
                engine_info!(
                    self.log,
                    "datapoint #{} ({}): {} -> {}",
                    saved.id,
                    saved.name,
                    current.status,
                    saved.status
                );
                report.notify(Notice::for_transition(&saved.name, &reconciled.transition));
                report.outcomes.push(EntityOutcome {
                    id: saved.id,
                    name: saved.name,
                    previous: current.status,
                    status: saved.status,
                    transition: reconciled.transition,
                });
            }
            Err(err) => self.record_failure(report, id, &current.name, &err),
        }
    }

    fn record_failure(&self, report: &mut CycleReport, id: DatapointId, name: &str, err: &StoreError) {
        engine_error!(self.log, "could not persist datapoint #{}: {}", id, err);
        report.failures.push(EntityFailure {
            id,
            name: name.to_string(),
            error: err.to_string(),
        });
        report.notify(Notice::store_failure(name, &err.to_string()));
    }
}

fn drop_result(report: &mut CycleReport, result: &ScrapeResult, reason: DropReason) {
    report.dropped.push(DroppedResult {
        url: result.url.clone(),
        xpath: result.xpath.clone(),
        reason,
    });
}
