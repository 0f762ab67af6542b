use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use engine_logging::{engine_error, SharedLog};
use tracker_core::{DatapointId, Effect, Selection};

use crate::dispatch::Route;
use crate::service::ScrapeService;
use crate::{EngineEvent, JobLabel};

enum EngineCommand {
    Scrape { id: DatapointId },
    Batch { selection: Selection, route: Route },
}

/// Runs scrape jobs on a background tokio runtime and reports each finished
/// cycle as an [`EngineEvent`].
///
/// Dropping the handle blocks until every queued job has finished.
pub struct EngineHandle {
    cmd_tx: Option<mpsc::Sender<EngineCommand>>,
    event_rx: mpsc::Receiver<EngineEvent>,
    worker: Option<thread::JoinHandle<()>>,
}

impl EngineHandle {
    pub fn new(service: Arc<ScrapeService>, log: SharedLog) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        let worker = thread::spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(err) => {
                    engine_error!(log, "cannot start engine runtime: {}", err);
                    return;
                }
            };
            let mut jobs = Vec::new();
            while let Ok(command) = cmd_rx.recv() {
                let service = service.clone();
                let event_tx = event_tx.clone();
                jobs.push(runtime.spawn(async move {
                    handle_command(service.as_ref(), command, event_tx).await;
                }));
                jobs.retain(|job| !job.is_finished());
            }
            // The handle is gone; drain in-flight jobs before the runtime drops.
            runtime.block_on(async {
                for job in jobs {
                    let _ = job.await;
                }
            });
        });

        Self {
            cmd_tx: Some(cmd_tx),
            event_rx,
            worker: Some(worker),
        }
    }

    fn send(&self, command: EngineCommand) {
        if let Some(cmd_tx) = &self.cmd_tx {
            let _ = cmd_tx.send(command);
        }
    }

    pub fn enqueue_scrape(&self, id: DatapointId) {
        self.send(EngineCommand::Scrape { id });
    }

    pub fn enqueue_batch(&self, selection: Selection, route: Route) {
        self.send(EngineCommand::Batch { selection, route });
    }

    /// Schedule the work an [`Effect`] asks for. Batches use `route`.
    pub fn apply(&self, effect: Effect, route: Route) {
        match effect {
            Effect::EnqueueScrape { id } => self.enqueue_scrape(id),
            Effect::EnqueueBatch { selection } => self.enqueue_batch(selection, route),
        }
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Stop accepting work, wait for the queued jobs and return the events
    /// nobody has received yet.
    pub fn finish(mut self) -> Vec<EngineEvent> {
        self.shut_down();
        self.event_rx.try_iter().collect()
    }

    fn shut_down(&mut self) {
        self.cmd_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shut_down();
    }
}

async fn handle_command(
    service: &ScrapeService,
    command: EngineCommand,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    let (job, report) = match command {
        EngineCommand::Scrape { id } => (JobLabel::Scrape(id), service.scrape_one(id).await),
        EngineCommand::Batch { selection, route } => {
            let report = service.run(&selection, route).await;
            (JobLabel::Batch(selection.to_string()), report)
        }
    };
    let _ = event_tx.send(EngineEvent::CycleCompleted { job, report });
}
