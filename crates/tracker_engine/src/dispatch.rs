use std::sync::Arc;
use std::time::Duration;

use engine_logging::{engine_error, engine_warn, SharedLog};
use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tracker_core::{ExtractionTask, ScrapeResult};

use crate::batch_client::{BatchError, RemoteBatchClient};
use crate::extract::Extractor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("malformed task (url '{url}', xpath '{xpath}')")]
    MalformedTask { url: String, xpath: String },
}

/// Where a batch is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Route {
    /// In-process, through the configured [`Extractor`].
    #[default]
    Local,
    /// One call to the remote batch service.
    Remote,
}

/// Turns tasks into results, either one by one through the local extractor or
/// as a single remote batch.
pub struct Dispatcher {
    extractor: Arc<dyn Extractor>,
    remote: Option<RemoteBatchClient>,
    call_timeout: Duration,
    concurrency: usize,
    log: SharedLog,
}

impl Dispatcher {
    pub fn new(extractor: Arc<dyn Extractor>, call_timeout: Duration, log: SharedLog) -> Self {
        Self {
            extractor,
            remote: None,
            call_timeout,
            concurrency: 1,
            log,
        }
    }

    pub fn with_remote(mut self, client: RemoteBatchClient) -> Self {
        self.remote = Some(client);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run one task through the local extractor.
    ///
    /// Extraction problems of every kind come back as a failed result; only a
    /// task that should never have been built is an error.
    pub async fn dispatch_one(&self, task: &ExtractionTask) -> Result<ScrapeResult, DispatchError> {
        if !task.is_well_formed() {
            return Err(DispatchError::MalformedTask {
                url: task.url.clone(),
                xpath: task.xpath.clone(),
            });
        }

        let call = self.extractor.extract(&task.url, &task.xpath, task.kind);
        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => ScrapeResult::success(task, value),
            Ok(Err(err)) => {
                engine_warn!(self.log, "extraction of {} failed: {}", task.url, err);
                ScrapeResult::failure(task, err.to_string())
            }
            Err(_) => {
                engine_warn!(
                    self.log,
                    "extraction of {} exceeded {:?}",
                    task.url,
                    self.call_timeout
                );
                ScrapeResult::failure(
                    task,
                    format!("extraction timed out after {:?}", self.call_timeout),
                )
            }
        };
        Ok(result)
    }

    /// Execute a whole batch. `Err` means nothing came back and nothing may be
    /// reconciled.
    pub async fn dispatch(
        &self,
        tasks: &[ExtractionTask],
        route: Route,
    ) -> Result<Vec<ScrapeResult>, BatchError> {
        match route {
            Route::Remote => match &self.remote {
                Some(client) => client.run(tasks).await,
                None => Err(BatchError::NotConfigured(
                    "no remote endpoint configured".to_string(),
                )),
            },
            Route::Local => Ok(self.dispatch_local(tasks).await),
        }
    }

    async fn dispatch_local(&self, tasks: &[ExtractionTask]) -> Vec<ScrapeResult> {
        stream::iter(tasks.iter().cloned())
            .map(|task| async move {
                match self.dispatch_one(&task).await {
                    Ok(result) => result,
                    Err(err) => {
                        engine_error!(self.log, "{}", err);
                        ScrapeResult::failure(&task, err.to_string())
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}
