use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use engine_logging::{engine_warn, SharedLog};
use tokio::runtime::Runtime;
use tracker_core::{
    CycleReport, Datapoint, DatapointId, ExtractionKind, Notice, NoticeLevel, Selection, Status,
    ValueKind,
};
use tracker_engine::{
    next_id, system_clock, write_atomically, Dispatcher, EngineEvent, EngineHandle,
    ExtractionProfile, HttpXPathExtractor, JsonFileStore, ProbeOutcome, RemoteBatchClient,
    RetryPolicy, Route, ScrapeService, TrackerConfig,
};

use crate::cli::{Cli, Command};

/// Grace period on top of the extraction timeout when waiting for the
/// initial scrape of a new datapoint.
const ENGINE_WAIT_SLACK: Duration = Duration::from_secs(5);

const VALUE_PREVIEW_CHARS: usize = 40;

/// Settings resolved from the config file, the environment and the global flags.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: TrackerConfig,
    pub profile: ExtractionProfile,
    pub store_path: PathBuf,
}

impl Settings {
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let config = TrackerConfig::load(&cli.config)?.with_process_env();
        let profile = if cli.production {
            ExtractionProfile::production()
        } else {
            config.extraction
        };
        let store_path = relative_to_config(&cli.config, &config.store_path);
        Ok(Self {
            config,
            profile,
            store_path,
        })
    }
}

/// Relative store paths are taken from the directory holding the config file.
fn relative_to_config(config_path: &Path, store_path: &Path) -> PathBuf {
    if store_path.is_absolute() {
        return store_path.to_path_buf();
    }
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(store_path),
        _ => store_path.to_path_buf(),
    }
}

pub fn build_service(settings: &Settings, retry: RetryPolicy, log: SharedLog) -> ScrapeService {
    let store = Arc::new(JsonFileStore::new(settings.store_path.clone()));
    let extractor = Arc::new(HttpXPathExtractor::new(&settings.profile, log.clone()));
    let mut dispatcher = Dispatcher::new(extractor, settings.profile.call_timeout(), log.clone())
        .with_concurrency(settings.config.local_concurrency);
    match RemoteBatchClient::from_config(&settings.config, retry, log.clone()) {
        Ok(client) => dispatcher = dispatcher.with_remote(client),
        Err(err) => engine_warn!(log, "scraper service disabled: {}", err),
    }
    ScrapeService::new(store, dispatcher, system_clock(), log)
}

pub fn execute(cli: &Cli, runtime: &Runtime, log: SharedLog, out: &mut dyn Write) -> Result<()> {
    let settings = Settings::resolve(cli)?;
    // Only the periodic runner waits out transient service failures.
    let retry = match cli.command {
        Command::RunAuto { .. } => settings.config.retry,
        _ => RetryPolicy::interactive(),
    };
    let service = || Arc::new(build_service(&settings, retry, log.clone()));

    match &cli.command {
        Command::Init => init_config(&cli.config, out),
        Command::Add {
            name,
            url,
            xpath,
            kind,
            group,
            status,
        } => {
            let service = service();
            let existing = runtime.block_on(service.store().list())?;
            let mut datapoint =
                Datapoint::new(next_id(&existing), name.as_str(), url.as_str(), xpath.as_str(), *kind)
                    .with_status(*status);
            if let Some(group) = group {
                datapoint = datapoint.with_group(group.as_str());
            }
            let wait = settings.profile.call_timeout() + ENGINE_WAIT_SLACK;
            add(service, runtime, datapoint, wait, log.clone(), out)
        }
        Command::List => list(&service(), runtime, out),
        Command::Scrape { id } => {
            let report = runtime.block_on(service().scrape_one(DatapointId(*id)));
            finish_cycle(&report, out)
        }
        Command::ScrapeAll { remote } => {
            run_cycle(&service(), runtime, Selection::Schedulable, route(*remote), out)
        }
        Command::RunAuto { local } => {
            run_cycle(&service(), runtime, Selection::AutoOnly, route(!*local), out)
        }
        Command::ScrapeGroup { name, remote } => run_cycle(
            &service(),
            runtime,
            Selection::Group(name.clone()),
            route(*remote),
            out,
        ),
        Command::Verify { id } => {
            let saved = runtime.block_on(service().verify(DatapointId(*id)))?;
            describe_action(&saved, out)
        }
        Command::Manual { id, value } => {
            let saved = runtime.block_on(service().set_manual(DatapointId(*id), value.clone()))?;
            describe_action(&saved, out)
        }
        Command::Release { id } => {
            let saved = runtime.block_on(service().release(DatapointId(*id)))?;
            describe_action(&saved, out)
        }
        Command::Probe {
            url,
            xpath,
            kind,
            remote,
        } => probe(&service(), runtime, url, xpath, *kind, route(*remote), out),
    }
}

fn route(remote: bool) -> Route {
    if remote {
        Route::Remote
    } else {
        Route::Local
    }
}

fn init_config(path: &Path, out: &mut dyn Write) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    let text = TrackerConfig::default().to_ron()?;
    write_atomically(path, text.as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    writeln!(out, "Wrote default configuration to {}", path.display())?;
    Ok(())
}

fn add(
    service: Arc<ScrapeService>,
    runtime: &Runtime,
    datapoint: Datapoint,
    wait: Duration,
    log: SharedLog,
    out: &mut dyn Write,
) -> Result<()> {
    let (saved, effect) = runtime.block_on(service.create(datapoint))?;
    writeln!(
        out,
        "Created datapoint #{} ({}) as {}",
        saved.id,
        saved.name,
        saved.status.label()
    )?;

    let Some(effect) = effect else {
        return Ok(());
    };
    let engine = EngineHandle::new(service, log);
    engine.apply(effect, Route::Local);
    if let Some(EngineEvent::CycleCompleted { report, .. }) = engine.recv_timeout(wait) {
        return print_report(&report, out);
    }
    writeln!(
        out,
        "Initial scrape is taking longer than {}s; waiting for it to finish.",
        wait.as_secs()
    )?;
    out.flush()?;
    for EngineEvent::CycleCompleted { report, .. } in engine.finish() {
        print_report(&report, out)?;
    }
    Ok(())
}

fn list(service: &ScrapeService, runtime: &Runtime, out: &mut dyn Write) -> Result<()> {
    let all = runtime.block_on(service.store().list())?;
    if all.is_empty() {
        writeln!(out, "No datapoints yet.")?;
        return Ok(());
    }
    for datapoint in &all {
        writeln!(out, "{}", render_row(datapoint))?;
    }
    Ok(())
}

fn render_row(dp: &Datapoint) -> String {
    let mut row = format!(
        "#{:<4} {:<6} {:<7} {:<24} verified={} latest={}",
        dp.id.0,
        dp.status.as_str(),
        dp.kind.as_str(),
        dp.name,
        preview(dp.current_verified_data.as_deref()),
        preview(dp.current_unverified_data.as_deref()),
    );
    if let Some(group) = &dp.group {
        row.push_str(&format!(" group={group}"));
    }
    row
}

fn preview(value: Option<&str>) -> String {
    match value {
        None => "-".to_string(),
        Some(text) => {
            let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if flat.chars().count() > VALUE_PREVIEW_CHARS {
                let cut: String = flat.chars().take(VALUE_PREVIEW_CHARS).collect();
                format!("{cut}…")
            } else {
                format!("{flat:?}")
            }
        }
    }
}

fn run_cycle(
    service: &ScrapeService,
    runtime: &Runtime,
    selection: Selection,
    route: Route,
    out: &mut dyn Write,
) -> Result<()> {
    let report = runtime.block_on(service.run(&selection, route));
    finish_cycle(&report, out)
}

fn finish_cycle(report: &CycleReport, out: &mut dyn Write) -> Result<()> {
    print_report(report, out)?;
    if let Some(error) = &report.batch_error {
        bail!("batch failed: {error}");
    }
    Ok(())
}

fn print_report(report: &CycleReport, out: &mut dyn Write) -> Result<()> {
    for notice in &report.notices {
        print_notice(notice, out)?;
    }
    if report.tasks_sent > 0 {
        writeln!(
            out,
            "{} sent, {} unchanged, {} to verify, {} to fix",
            report.tasks_sent,
            report.count(Status::Auto),
            report.count(Status::Verify),
            report.count(Status::Fix)
        )?;
    }
    Ok(())
}

fn print_notice(notice: &Notice, out: &mut dyn Write) -> Result<()> {
    let tag = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Success => "ok",
        NoticeLevel::Warning => "warn",
        NoticeLevel::Error => "error",
    };
    writeln!(out, "[{tag}] {}", notice.message)?;
    Ok(())
}

fn describe_action(saved: &Datapoint, out: &mut dyn Write) -> Result<()> {
    writeln!(
        out,
        "Datapoint #{} ({}) is now {}; baseline {}",
        saved.id,
        saved.name,
        saved.status.label(),
        preview(saved.current_verified_data.as_deref())
    )?;
    Ok(())
}

fn probe(
    service: &ScrapeService,
    runtime: &Runtime,
    url: &str,
    xpath: &str,
    kind: ValueKind,
    route: Route,
    out: &mut dyn Write,
) -> Result<()> {
    let kind = kind.extraction_kind().unwrap_or(ExtractionKind::Text);
    match runtime.block_on(service.probe(url, xpath, kind, route)) {
        ProbeOutcome::Found(value) => writeln!(out, "{value}")?,
        ProbeOutcome::NoData => writeln!(out, "The rule matched, but the content is empty.")?,
        ProbeOutcome::Failed(notice) => {
            print_notice(&notice, out)?;
            bail!("probe failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use engine_logging::NullLog;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tracker_engine::{DatapointStore, ExtractError, Extractor, MemoryStore};

    fn run(temp: &TempDir, args: &[&str]) -> Result<String> {
        let config = temp.path().join("tracker.ron");
        let mut argv = vec!["tracker", "--config", config.to_str().unwrap()];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        let runtime = Runtime::new().unwrap();
        let mut out = Vec::new();
        execute(&cli, &runtime, NullLog::shared(), &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn store_path_follows_the_config_file() {
        assert_eq!(
            relative_to_config(Path::new("/srv/tracker/tracker.ron"), Path::new("dp.json")),
            PathBuf::from("/srv/tracker/dp.json")
        );
        assert_eq!(
            relative_to_config(Path::new("tracker.ron"), Path::new("dp.json")),
            PathBuf::from("dp.json")
        );
        assert_eq!(
            relative_to_config(Path::new("/srv/tracker.ron"), Path::new("/data/dp.json")),
            PathBuf::from("/data/dp.json")
        );
    }

    #[test]
    fn init_writes_a_loadable_config_once() {
        let temp = TempDir::new().unwrap();

        let output = run(&temp, &["init"]).unwrap();
        assert!(output.starts_with("Wrote default configuration"));
        let loaded = TrackerConfig::load(&temp.path().join("tracker.ron")).unwrap();
        assert_eq!(loaded, TrackerConfig::default());

        assert!(run(&temp, &["init"]).is_err());
    }

    #[test]
    fn human_actions_round_trip_through_the_store() {
        let temp = TempDir::new().unwrap();

        let created = run(
            &temp,
            &["add", "price", "https://shop.example.com", "//span", "--status", "MANUAL"],
        )
        .unwrap();
        assert_eq!(created, "Created datapoint #1 (price) as Manual\n");

        let manual = run(&temp, &["manual", "1", "19.99"]).unwrap();
        assert_eq!(
            manual,
            "Datapoint #1 (price) is now Manual; baseline \"19.99\"\n"
        );

        let released = run(&temp, &["release", "1"]).unwrap();
        assert!(released.contains("is now Automated"));

        let listed = run(&temp, &["list"]).unwrap();
        assert!(listed.starts_with("#1"));
        assert!(listed.contains("AUTO"));
        assert!(listed.contains("verified=\"19.99\""));
        assert!(temp.path().join("datapoints.json").is_file());
    }

    #[test]
    fn unknown_datapoint_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(run(&temp, &["verify", "7"]).is_err());

        let err = run(&temp, &["scrape", "7"]).unwrap_err();
        assert!(err.to_string().starts_with("batch failed"));
    }

    struct SlowExtractor;

    #[async_trait::async_trait]
    impl Extractor for SlowExtractor {
        async fn extract(
            &self,
            _url: &str,
            _rule: &str,
            _kind: ExtractionKind,
        ) -> Result<String, ExtractError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok("42".to_string())
        }
    }

    #[test]
    fn add_waits_for_a_slow_initial_scrape() {
        let log = NullLog::shared();
        let store = Arc::new(MemoryStore::new());
        let dispatcher =
            Dispatcher::new(Arc::new(SlowExtractor), Duration::from_secs(5), log.clone());
        let service = Arc::new(ScrapeService::new(
            store.clone(),
            dispatcher,
            system_clock(),
            log.clone(),
        ));
        let runtime = Runtime::new().unwrap();
        let datapoint = Datapoint::new(
            DatapointId(1),
            "answer",
            "https://a.example.com",
            "//h1",
            ValueKind::Text,
        );
        let mut out = Vec::new();

        add(service, &runtime, datapoint, Duration::from_millis(10), log, &mut out).unwrap();

        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("waiting for it to finish"), "{output}");
        assert!(output.ends_with("1 sent, 0 unchanged, 1 to verify, 0 to fix\n"), "{output}");
        let stored = runtime.block_on(store.get(DatapointId(1))).unwrap();
        assert_eq!(stored.status, Status::Verify);
        assert_eq!(stored.current_unverified_data.as_deref(), Some("42"));
    }

    #[test]
    fn long_values_are_shortened() {
        let long = "x".repeat(60);
        let shown = preview(Some(&long));
        assert_eq!(shown.chars().count(), VALUE_PREVIEW_CHARS + 1);
        assert_eq!(preview(Some("  a \n b ")), "\"a b\"");
        assert_eq!(preview(None), "-");
    }
}
