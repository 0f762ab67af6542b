use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use engine_logging::{Level, NullLog, RecordingLog, SharedLog};
use pretty_assertions::assert_eq;
use tracker_core::{
    Datapoint, DatapointId, DropReason, Effect, ExtractionKind, Notice, Selection, Status,
    ValueKind,
};
use tracker_engine::{
    Clock, DatapointStore, Dispatcher, EngineEvent, EngineHandle, ExtractError, Extractor,
    FailureKind, JobLabel, MemoryStore, ProbeOutcome, Route, ScrapeService, StoreError,
    StoreResult,
};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn fixed_clock() -> Clock {
    Arc::new(noon)
}

fn dp(id: u64, url: &str) -> Datapoint {
    Datapoint::new(DatapointId(id), format!("dp-{id}"), url, "//h1", ValueKind::Text)
}

/// Answers by url; unknown urls select nothing.
#[derive(Default)]
struct ScriptedExtractor {
    answers: HashMap<String, Result<String, ExtractError>>,
    calls: Mutex<Vec<(String, ExtractionKind)>>,
    delay: Option<Duration>,
}

impl ScriptedExtractor {
    fn answer(mut self, url: &str, value: &str) -> Self {
        self.answers.insert(url.to_string(), Ok(value.to_string()));
        self
    }

    fn fail(mut self, url: &str, kind: FailureKind, message: &str) -> Self {
        self.answers
            .insert(url.to_string(), Err(ExtractError::new(kind, message)));
        self
    }

    fn calls(&self) -> Vec<(String, ExtractionKind)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(
        &self,
        url: &str,
        _rule: &str,
        kind: ExtractionKind,
    ) -> Result<String, ExtractError> {
        self.calls.lock().unwrap().push((url.to_string(), kind));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answers
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(ExtractError::no_match()))
    }
}

/// Store whose writes fail for some ids, or lose a race for others.
struct UnreliableStore {
    inner: MemoryStore,
    failing: HashSet<DatapointId>,
    racing: HashSet<DatapointId>,
}

#[async_trait::async_trait]
impl DatapointStore for UnreliableStore {
    async fn get(&self, id: DatapointId) -> StoreResult<Datapoint> {
        self.inner.get(id).await
    }

    async fn list(&self) -> StoreResult<Vec<Datapoint>> {
        self.inner.list().await
    }

    async fn insert(&self, datapoint: Datapoint) -> StoreResult<Datapoint> {
        self.inner.insert(datapoint).await
    }

    async fn update(&self, datapoint: &Datapoint) -> StoreResult<Datapoint> {
        if self.failing.contains(&datapoint.id) {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        if self.racing.contains(&datapoint.id) {
            // An operator verifies the entity while the cycle is in flight.
            let current = self.inner.get(datapoint.id).await?;
            self.inner
                .update(&tracker_core::verify(&current, noon()))
                .await?;
        }
        self.inner.update(datapoint).await
    }
}

struct Harness {
    extractor: Arc<ScriptedExtractor>,
    service: Arc<ScrapeService>,
    log: Arc<RecordingLog>,
}

fn harness(store: Arc<dyn DatapointStore>, extractor: ScriptedExtractor) -> Harness {
    harness_with_timeout(store, extractor, Duration::from_secs(5))
}

fn harness_with_timeout(
    store: Arc<dyn DatapointStore>,
    extractor: ScriptedExtractor,
    call_timeout: Duration,
) -> Harness {
    init_logging();
    let log = Arc::new(RecordingLog::new());
    let shared: SharedLog = log.clone();
    let extractor = Arc::new(extractor);
    let dispatcher =
        Dispatcher::new(extractor.clone(), call_timeout, shared.clone()).with_concurrency(2);
    let service = Arc::new(ScrapeService::new(store, dispatcher, fixed_clock(), shared));
    Harness {
        extractor,
        service,
        log,
    }
}

#[tokio::test]
async fn local_cycle_applies_every_transition_and_skips_manual() {
    let store = Arc::new(MemoryStore::with_datapoints([
        dp(1, "https://a.example.com").with_verified("same"),
        dp(2, "https://b.example.com").with_verified("old"),
        dp(3, "https://c.example.com"),
        dp(4, "https://d.example.com").with_status(Status::Manual),
        dp(5, "https://e.example.com").with_status(Status::Fix),
    ]));
    let extractor = ScriptedExtractor::default()
        .answer("https://a.example.com", "same")
        .answer("https://b.example.com", "new")
        .fail("https://c.example.com", FailureKind::HttpStatus(500), "boom")
        .answer("https://d.example.com", "never asked")
        .answer("https://e.example.com", "  ");
    let h = harness(store.clone(), extractor);

    let report = h.service.run(&Selection::Schedulable, Route::Local).await;

    let statuses: Vec<_> = store
        .list()
        .await
        .unwrap()
        .iter()
        .map(|d| (d.id.0, d.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (1, Status::Auto),
            (2, Status::Verify),
            (3, Status::Fix),
            (4, Status::Manual),
            (5, Status::Fix),
        ]
    );
    assert_eq!(report.tasks_sent, 4);
    assert!(!h
        .extractor
        .calls()
        .iter()
        .any(|(url, _)| url == "https://d.example.com"));

    let manual = store.get(DatapointId(4)).await.unwrap();
    assert_eq!(manual.revision, 0);
    let verified = store.get(DatapointId(1)).await.unwrap();
    assert_eq!(verified.last_verified, Some(noon()));
    assert_eq!(verified.last_updated, Some(noon()));

    let messages: Vec<_> = report.notices.iter().map(|n| n.message.clone()).collect();
    assert!(messages.contains(&"No changes detected for Datapoint: dp-1. Status set to AUTO.".to_string()));
    assert!(messages.contains(&"No data found for Datapoint: dp-5. Status set to FIX.".to_string()));
    assert!(messages
        .iter()
        .any(|m| m.starts_with("Failed to scrape Datapoint: dp-3. Error: http status 500")));
}

#[tokio::test]
async fn a_failing_write_does_not_stop_the_batch() {
    let store = Arc::new(UnreliableStore {
        inner: MemoryStore::with_datapoints([
            dp(1, "https://a.example.com"),
            dp(2, "https://b.example.com"),
            dp(3, "https://c.example.com"),
        ]),
        failing: HashSet::from([DatapointId(2)]),
        racing: HashSet::new(),
    });
    let extractor = ScriptedExtractor::default()
        .answer("https://a.example.com", "1")
        .answer("https://b.example.com", "2")
        .answer("https://c.example.com", "3");
    let h = harness(store.clone(), extractor);

    let report = h.service.run(&Selection::AutoOnly, Route::Local).await;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, DatapointId(2));
    assert_eq!(store.get(DatapointId(1)).await.unwrap().status, Status::Verify);
    assert_eq!(store.get(DatapointId(2)).await.unwrap().status, Status::Auto);
    assert_eq!(store.get(DatapointId(3)).await.unwrap().status, Status::Verify);
    assert!(h.log.contains(Level::Error, "disk full"));
    assert!(report.has_errors());
}

#[tokio::test]
async fn concurrent_human_verification_wins_the_race() {
    let mut pending = dp(1, "https://a.example.com")
        .with_status(Status::Verify)
        .with_verified("old");
    pending.current_unverified_data = Some("new".to_string());
    let store = Arc::new(UnreliableStore {
        inner: MemoryStore::with_datapoints([pending]),
        failing: HashSet::new(),
        racing: HashSet::from([DatapointId(1)]),
    });
    let h = harness(
        store.clone(),
        ScriptedExtractor::default().answer("https://a.example.com", "newer"),
    );

    let report = h.service.run(&Selection::Schedulable, Route::Local).await;

    let stored = store.get(DatapointId(1)).await.unwrap();
    assert_eq!(stored.status, Status::Auto);
    assert_eq!(stored.current_verified_data.as_deref(), Some("new"));
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].error.contains("changed concurrently"));
}

#[tokio::test]
async fn display_kinds_are_extracted_as_text() {
    let store = Arc::new(MemoryStore::with_datapoints([Datapoint::new(
        DatapointId(1),
        "count",
        "https://a.example.com",
        "//span",
        ValueKind::Integer,
    )]));
    let h = harness(
        store.clone(),
        ScriptedExtractor::default().answer("https://a.example.com", "12"),
    );

    let report = h.service.run(&Selection::AutoOnly, Route::Local).await;

    assert_eq!(
        h.extractor.calls(),
        vec![("https://a.example.com".to_string(), ExtractionKind::Text)]
    );
    assert!(report
        .notices
        .contains(&Notice::kind_defaulted("count", ValueKind::Integer)));
    assert_eq!(store.get(DatapointId(1)).await.unwrap().status, Status::Verify);
}

#[tokio::test]
async fn slow_extractions_become_failures() {
    let store = Arc::new(MemoryStore::with_datapoints([dp(1, "https://a.example.com")]));
    let extractor = ScriptedExtractor {
        delay: Some(Duration::from_millis(500)),
        ..ScriptedExtractor::default()
    }
    .answer("https://a.example.com", "late");
    let h = harness_with_timeout(store.clone(), extractor, Duration::from_millis(50));

    let report = h.service.run(&Selection::AutoOnly, Route::Local).await;

    let stored = store.get(DatapointId(1)).await.unwrap();
    assert_eq!(stored.status, Status::Fix);
    assert_eq!(stored.current_unverified_data, None);
    assert!(report.notices[0].message.contains("timed out"));
}

#[tokio::test]
async fn single_path_handles_each_status() {
    let store = Arc::new(MemoryStore::with_datapoints([
        dp(1, "https://a.example.com")
            .with_status(Status::Fix)
            .with_verified("v"),
        dp(2, "https://b.example.com").with_status(Status::Manual),
    ]));
    let h = harness(
        store.clone(),
        ScriptedExtractor::default().answer("https://a.example.com", "v"),
    );

    let recovered = h.service.scrape_one(DatapointId(1)).await;
    assert_eq!(
        recovered.outcome_for(DatapointId(1)).map(|o| o.status),
        Some(Status::Auto)
    );
    assert_eq!(
        store.get(DatapointId(1)).await.unwrap().last_verified,
        Some(noon())
    );

    let manual = h.service.scrape_one(DatapointId(2)).await;
    assert_eq!(manual.tasks_sent, 0);
    assert_eq!(
        manual.notices,
        vec![Notice::not_schedulable("dp-2", Status::Manual)]
    );

    let missing = h.service.scrape_one(DatapointId(99)).await;
    assert!(missing.is_aborted());
    assert_eq!(
        missing.notices[0].message,
        "Datapoint #99 does not exist."
    );
    assert_eq!(h.extractor.calls().len(), 1);
}

#[tokio::test]
async fn empty_selections_explain_themselves() {
    let store = Arc::new(MemoryStore::with_datapoints([
        dp(1, "https://a.example.com").with_status(Status::Manual)
    ]));
    let h = harness(store, ScriptedExtractor::default());

    let by_id = h
        .service
        .run(&Selection::One(DatapointId(1)), Route::Local)
        .await;
    assert_eq!(
        by_id.notices,
        vec![Notice::not_schedulable("dp-1", Status::Manual)]
    );

    let group = h
        .service
        .run(&Selection::Group("prices".to_string()), Route::Local)
        .await;
    assert_eq!(group.tasks_sent, 0);
    assert_eq!(group.notices.len(), 1);
    assert!(h.extractor.calls().is_empty());
}

#[tokio::test]
async fn group_runs_only_touch_the_group() {
    let store = Arc::new(MemoryStore::with_datapoints([
        dp(1, "https://a.example.com").with_group("prices"),
        dp(2, "https://b.example.com").with_group("stock"),
        dp(3, "https://c.example.com")
            .with_group("prices")
            .with_status(Status::Fix),
    ]));
    let h = harness(
        store.clone(),
        ScriptedExtractor::default()
            .answer("https://a.example.com", "1")
            .answer("https://b.example.com", "2"),
    );

    let report = h
        .service
        .run(&Selection::Group("prices".to_string()), Route::Local)
        .await;

    assert_eq!(report.tasks_sent, 1);
    assert_eq!(store.get(DatapointId(2)).await.unwrap().revision, 0);
    assert_eq!(store.get(DatapointId(3)).await.unwrap().revision, 0);
}

#[tokio::test]
async fn remote_route_without_endpoint_aborts() {
    let store = Arc::new(MemoryStore::with_datapoints([dp(1, "https://a.example.com")]));
    let h = harness(store.clone(), ScriptedExtractor::default());

    let report = h.service.run(&Selection::AutoOnly, Route::Remote).await;

    assert!(report.is_aborted());
    assert_eq!(store.get(DatapointId(1)).await.unwrap().revision, 0);
}

#[tokio::test]
async fn probe_reports_without_touching_the_store() {
    let store = Arc::new(MemoryStore::with_datapoints([dp(1, "https://a.example.com")]));
    let h = harness(
        store.clone(),
        ScriptedExtractor::default()
            .answer("https://a.example.com", "<b>hi</b>")
            .fail("https://b.example.com", FailureKind::Timeout, "too slow"),
    );

    assert_eq!(
        h.service
            .probe("https://a.example.com", "//b", ExtractionKind::Markup, Route::Local)
            .await,
        ProbeOutcome::Found("<b>hi</b>".to_string())
    );
    let failed = h
        .service
        .probe("https://b.example.com", "//b", ExtractionKind::Text, Route::Local)
        .await;
    assert!(matches!(failed, ProbeOutcome::Failed(notice) if notice.message.contains("too slow")));
    let malformed = h
        .service
        .probe("https://a.example.com", "", ExtractionKind::Text, Route::Local)
        .await;
    assert!(matches!(malformed, ProbeOutcome::Failed(_)));

    assert_eq!(store.get(DatapointId(1)).await.unwrap().revision, 0);
}

#[tokio::test]
async fn human_actions_go_through_the_store() {
    let mut pending = dp(1, "https://a.example.com")
        .with_status(Status::Verify)
        .with_verified("old");
    pending.current_unverified_data = Some("new".to_string());
    let store = Arc::new(MemoryStore::with_datapoints([pending]));
    let h = harness(store.clone(), ScriptedExtractor::default());

    let verified = h.service.verify(DatapointId(1)).await.unwrap();
    assert_eq!(verified.status, Status::Auto);
    assert_eq!(verified.previously_verified_data.as_deref(), Some("old"));
    assert_eq!(verified.current_verified_data.as_deref(), Some("new"));

    let manual = h
        .service
        .set_manual(DatapointId(1), Some("typed".to_string()))
        .await
        .unwrap();
    assert_eq!(manual.status, Status::Manual);

    let released = h.service.release(DatapointId(1)).await.unwrap();
    assert_eq!(released.status, Status::Auto);
    assert_eq!(released.current_verified_data.as_deref(), Some("typed"));
    assert_eq!(released.revision, 3);

    assert_eq!(
        h.service.verify(DatapointId(7)).await,
        Err(StoreError::NotFound(DatapointId(7)))
    );
}

#[test]
fn creating_an_auto_datapoint_schedules_its_first_scrape() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(
        store.clone(),
        ScriptedExtractor::default().answer("https://a.example.com", "first"),
    );
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let (created, effect) = runtime
        .block_on(h.service.create(dp(1, "https://a.example.com")))
        .unwrap();
    assert_eq!(effect, Some(Effect::EnqueueScrape { id: created.id }));
    let (_, none) = runtime
        .block_on(
            h.service
                .create(dp(2, "https://b.example.com").with_status(Status::Manual)),
        )
        .unwrap();
    assert_eq!(none, None);

    let engine = EngineHandle::new(h.service.clone(), NullLog::shared());
    engine.apply(effect.unwrap(), Route::Local);

    let event = engine.recv_timeout(Duration::from_secs(5)).expect("cycle event");
    let EngineEvent::CycleCompleted { job, report } = event;
    assert_eq!(job, JobLabel::Scrape(DatapointId(1)));
    assert_eq!(
        report.outcome_for(DatapointId(1)).map(|o| o.status),
        Some(Status::Verify)
    );
    let stored = runtime.block_on(store.get(DatapointId(1))).unwrap();
    assert_eq!(stored.current_unverified_data.as_deref(), Some("first"));
}

#[test]
fn batches_can_be_queued_in_the_background() {
    let store = Arc::new(MemoryStore::with_datapoints([
        dp(1, "https://a.example.com"),
        dp(2, "https://b.example.com"),
    ]));
    let h = harness(store, ScriptedExtractor::default().answer("https://a.example.com", "x"));
    let engine = EngineHandle::new(h.service.clone(), NullLog::shared());

    engine.enqueue_batch(Selection::AutoOnly, Route::Local);

    let Some(EngineEvent::CycleCompleted { job, report }) =
        engine.recv_timeout(Duration::from_secs(5))
    else {
        panic!("no cycle event");
    };
    assert_eq!(job, JobLabel::Batch("all AUTO datapoints".to_string()));
    assert_eq!(report.count(Status::Verify), 1);
    assert_eq!(report.count(Status::Fix), 1);
    assert_eq!(
        report.dropped.iter().map(|d| d.reason).collect::<Vec<DropReason>>(),
        Vec::new()
    );
}

#[test]
fn dropping_the_handle_finishes_queued_jobs() {
    let store = Arc::new(MemoryStore::with_datapoints([dp(1, "https://a.example.com")]));
    let h = harness(
        store.clone(),
        ScriptedExtractor {
            delay: Some(Duration::from_millis(200)),
            ..ScriptedExtractor::default()
        }
        .answer("https://a.example.com", "late"),
    );

    let engine = EngineHandle::new(h.service.clone(), NullLog::shared());
    engine.enqueue_scrape(DatapointId(1));
    drop(engine);

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let stored = runtime.block_on(store.get(DatapointId(1))).unwrap();
    assert_eq!(stored.status, Status::Verify);
    assert_eq!(stored.current_unverified_data.as_deref(), Some("late"));
}

#[test]
fn finishing_returns_the_events_nobody_received() {
    let store = Arc::new(MemoryStore::with_datapoints([
        dp(1, "https://a.example.com"),
        dp(2, "https://b.example.com"),
    ]));
    let h = harness(
        store,
        ScriptedExtractor {
            delay: Some(Duration::from_millis(100)),
            ..ScriptedExtractor::default()
        }
        .answer("https://a.example.com", "x")
        .answer("https://b.example.com", "y"),
    );

    let engine = EngineHandle::new(h.service.clone(), NullLog::shared());
    engine.enqueue_batch(Selection::AutoOnly, Route::Local);
    assert!(engine.try_recv().is_none());

    let events = engine.finish();
    assert_eq!(events.len(), 1);
    let EngineEvent::CycleCompleted { job, report } = &events[0];
    assert_eq!(job, &JobLabel::Batch("all AUTO datapoints".to_string()));
    assert_eq!(report.count(Status::Verify), 2);
}
