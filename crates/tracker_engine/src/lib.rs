//! Tracker engine: page extraction, remote batches, stores and the scrape cycle.
mod batch_client;
mod config;
mod decode;
mod dispatch;
mod engine;
mod extract;
mod fetch;
mod file_store;
mod reconciler;
mod service;
mod store;
mod types;
mod xpath;

pub use batch_client::{BatchError, RemoteBatchClient};
pub use config::{
    ConfigError, ExtractionProfile, RetryPolicy, TrackerConfig, BASE_URL_ENV,
    DEFAULT_CONFIG_FILENAME, TOKEN_ENV,
};
pub use decode::{decode_page, DecodeError, DecodedPage};
pub use dispatch::{DispatchError, Dispatcher, Route};
pub use engine::EngineHandle;
pub use extract::{extract_from_html, Extractor, HttpXPathExtractor};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher};
pub use file_store::{write_atomically, JsonFileStore, PersistError};
pub use reconciler::{system_clock, Clock, Reconciler};
pub use service::{ProbeOutcome, ScrapeService};
pub use store::{next_id, DatapointStore, MemoryStore, StoreError, StoreResult};
pub use types::{
    EngineEvent, ExtractError, FailureKind, FetchMetadata, FetchOutput, JobLabel, Stage,
    NO_MATCH_MESSAGE,
};
pub use xpath::{Selected, XPath, XPathError};
