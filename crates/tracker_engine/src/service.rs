use std::sync::Arc;

use engine_logging::{engine_error, engine_info, engine_warn, SharedLog};
use tracker_core::{
    build_batch, on_created, release_to_auto, select, set_manual, verify, CycleReport, Datapoint,
    DatapointId, Effect, ExtractionKind, ExtractionTask, Notice, Selection, SkipReason,
};

use crate::dispatch::{Dispatcher, Route};
use crate::reconciler::{Clock, Reconciler};
use crate::store::{DatapointStore, StoreResult};

/// Outcome of an ad-hoc rule test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Found(String),
    NoData,
    Failed(Notice),
}

/// One place that runs select → build → dispatch → reconcile and the
/// human-facing status actions.
pub struct ScrapeService {
    store: Arc<dyn DatapointStore>,
    dispatcher: Dispatcher,
    reconciler: Reconciler,
    clock: Clock,
    log: SharedLog,
}

impl ScrapeService {
    pub fn new(
        store: Arc<dyn DatapointStore>,
        dispatcher: Dispatcher,
        clock: Clock,
        log: SharedLog,
    ) -> Self {
        let reconciler = Reconciler::new(store.clone(), clock.clone(), log.clone());
        Self {
            store,
            dispatcher,
            reconciler,
            clock,
            log,
        }
    }

    pub fn store(&self) -> &Arc<dyn DatapointStore> {
        &self.store
    }

    /// Run one cycle over the datapoints `selection` picks.
    pub async fn run(&self, selection: &Selection, route: Route) -> CycleReport {
        let mut report = CycleReport::default();
        let all = match self.store.list().await {
            Ok(all) => all,
            Err(err) => {
                engine_error!(self.log, "cannot list datapoints: {}", err);
                report.batch_error = Some(err.to_string());
                report.notify(Notice::service_error(&err.to_string()));
                return report;
            }
        };

        let working_set = select(&all, selection);
        if working_set.is_empty() {
            self.explain_empty_selection(&all, selection, &mut report);
            return report;
        }

        let plan = build_batch(&working_set);
        for (dp, reason) in &plan.skipped {
            self.note_skip(dp, *reason, &mut report);
        }
        for warning in &plan.warnings {
            engine_warn!(
                self.log,
                "datapoint #{} declares {}; extracting as text",
                warning.id,
                warning.declared
            );
            report.notify(Notice::kind_defaulted(&warning.name, warning.declared));
        }
        if plan.is_empty() {
            report.notify(Notice::no_valid_tasks());
            return report;
        }

        report.tasks_sent = plan.tasks.len();
        engine_info!(
            self.log,
            "dispatching {} tasks for {} via {:?}",
            plan.tasks.len(),
            selection,
            route
        );
        match self.dispatcher.dispatch(&plan.tasks, route).await {
            Ok(results) => {
                self.reconciler
                    .apply(&working_set, results, &mut report)
                    .await
            }
            Err(err) => {
                engine_error!(self.log, "batch for {} failed: {}", selection, err);
                report.batch_error = Some(err.to_string());
                report.notify(err.notice());
            }
        }
        engine_info!(self.log, "cycle {} finished: {}", selection, report.summary());
        report
    }

    /// The synchronous single-datapoint path: one local extraction, then reconcile.
    pub async fn scrape_one(&self, id: DatapointId) -> CycleReport {
        let mut report = CycleReport::default();
        let dp = match self.store.get(id).await {
            Ok(dp) => dp,
            Err(err) => {
                engine_error!(self.log, "cannot load datapoint #{}: {}", id, err);
                report.batch_error = Some(err.to_string());
                report.notify(Notice::unknown_datapoint(id));
                return report;
            }
        };
        if !dp.is_schedulable() {
            report.notify(Notice::not_schedulable(&dp.name, dp.status));
            return report;
        }

        let plan = build_batch(std::slice::from_ref(&dp));
        for (dp, reason) in &plan.skipped {
            self.note_skip(dp, *reason, &mut report);
        }
        for warning in &plan.warnings {
            report.notify(Notice::kind_defaulted(&warning.name, warning.declared));
        }
        let Some(task) = plan.tasks.first() else {
            return report;
        };

        report.tasks_sent = 1;
        match self.dispatcher.dispatch_one(task).await {
            Ok(result) => self.reconciler.apply(&[dp], vec![result], &mut report).await,
            Err(err) => {
                engine_error!(self.log, "datapoint #{}: {}", id, err);
                report.batch_error = Some(err.to_string());
                report.notify(Notice::service_error(&err.to_string()));
            }
        }
        report
    }

    /// Try a rule against a page without touching any datapoint.
    pub async fn probe(
        &self,
        url: &str,
        xpath: &str,
        kind: ExtractionKind,
        route: Route,
    ) -> ProbeOutcome {
        let task = ExtractionTask::new(url, xpath, kind);
        let result = match route {
            Route::Local => match self.dispatcher.dispatch_one(&task).await {
                Ok(result) => result,
                Err(err) => return ProbeOutcome::Failed(Notice::service_error(&err.to_string())),
            },
            Route::Remote => match self.dispatcher.dispatch(std::slice::from_ref(&task), route).await {
                Ok(results) => match results.into_iter().next() {
                    Some(result) => result,
                    None => {
                        return ProbeOutcome::Failed(Notice::invalid_response(
                            "no result returned for the probe",
                        ))
                    }
                },
                Err(err) => return ProbeOutcome::Failed(err.notice()),
            },
        };

        match (result.extracted_value(), result.is_success()) {
            (Some(value), _) => ProbeOutcome::Found(value.to_string()),
            (None, true) => ProbeOutcome::NoData,
            (None, false) => ProbeOutcome::Failed(Notice::service_error(
                result.error.as_deref().unwrap_or("unknown extraction error"),
            )),
        }
    }

    /// Store a new datapoint and return the follow-up work its creation asks for.
    pub async fn create(&self, datapoint: Datapoint) -> StoreResult<(Datapoint, Option<Effect>)> {
        let saved = self.store.insert(datapoint).await?;
        engine_info!(self.log, "created datapoint #{} ({})", saved.id, saved.name);
        let effect = on_created(&saved);
        Ok((saved, effect))
    }

    pub async fn verify(&self, id: DatapointId) -> StoreResult<Datapoint> {
        let current = self.store.get(id).await?;
        let saved = self.store.update(&verify(&current, (self.clock)())).await?;
        engine_info!(self.log, "datapoint #{} verified by operator", id);
        Ok(saved)
    }

    pub async fn set_manual(&self, id: DatapointId, value: Option<String>) -> StoreResult<Datapoint> {
        let current = self.store.get(id).await?;
        let saved = self
            .store
            .update(&set_manual(&current, value, (self.clock)()))
            .await?;
        engine_info!(self.log, "datapoint #{} is now manually maintained", id);
        Ok(saved)
    }

    pub async fn release(&self, id: DatapointId) -> StoreResult<Datapoint> {
        let current = self.store.get(id).await?;
        let saved = self.store.update(&release_to_auto(&current)).await?;
        engine_info!(self.log, "datapoint #{} released to automation", id);
        Ok(saved)
    }

    fn note_skip(&self, dp: &Datapoint, reason: SkipReason, report: &mut CycleReport) {
        engine_warn!(self.log, "skipping datapoint #{} ({}): {}", dp.id, dp.name, reason);
        report.skipped.push((dp.id, reason));
        report.notify(Notice::skipped(&dp.name, reason));
    }

    fn explain_empty_selection(
        &self,
        all: &[Datapoint],
        selection: &Selection,
        report: &mut CycleReport,
    ) {
        let notice = match selection {
            Selection::One(id) => match all.iter().find(|dp| dp.id == *id) {
                Some(dp) => Notice::not_schedulable(&dp.name, dp.status),
                None => Notice::unknown_datapoint(*id),
            },
            other => Notice::nothing_selected(&other.to_string()),
        };
        engine_warn!(self.log, "{}", notice.message);
        report.notify(notice);
    }
}
