use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;
use tracker_core::{Datapoint, DatapointId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("datapoint #{0} not found")]
    NotFound(DatapointId),
    #[error("datapoint #{0} already exists")]
    Duplicate(DatapointId),
    #[error("datapoint #{id} changed concurrently (expected revision {expected}, found {found})")]
    Conflict {
        id: DatapointId,
        expected: u64,
        found: u64,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for datapoints.
///
/// `update` is a compare-and-set on [`Datapoint::revision`]: it only succeeds
/// when the stored revision equals the one being written, and it returns the
/// stored copy with the revision bumped.
#[async_trait::async_trait]
pub trait DatapointStore: Send + Sync {
    async fn get(&self, id: DatapointId) -> StoreResult<Datapoint>;
    /// All datapoints, ordered by id.
    async fn list(&self) -> StoreResult<Vec<Datapoint>>;
    async fn insert(&self, datapoint: Datapoint) -> StoreResult<Datapoint>;
    async fn update(&self, datapoint: &Datapoint) -> StoreResult<Datapoint>;
}

/// Next free id above everything in `existing`.
pub fn next_id(existing: &[Datapoint]) -> DatapointId {
    DatapointId(existing.iter().map(|dp| dp.id.0).max().unwrap_or(0) + 1)
}

pub(crate) fn insert_into(
    table: &mut BTreeMap<DatapointId, Datapoint>,
    mut datapoint: Datapoint,
) -> StoreResult<Datapoint> {
    if table.contains_key(&datapoint.id) {
        return Err(StoreError::Duplicate(datapoint.id));
    }
    datapoint.revision = 0;
    table.insert(datapoint.id, datapoint.clone());
    Ok(datapoint)
}

pub(crate) fn compare_and_set(
    table: &mut BTreeMap<DatapointId, Datapoint>,
    datapoint: &Datapoint,
) -> StoreResult<Datapoint> {
    let stored = table
        .get_mut(&datapoint.id)
        .ok_or(StoreError::NotFound(datapoint.id))?;
    if stored.revision != datapoint.revision {
        return Err(StoreError::Conflict {
            id: datapoint.id,
            expected: datapoint.revision,
            found: stored.revision,
        });
    }
    let mut next = datapoint.clone();
    next.revision += 1;
    *stored = next.clone();
    Ok(next)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<BTreeMap<DatapointId, Datapoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_datapoints(datapoints: impl IntoIterator<Item = Datapoint>) -> Self {
        let table = datapoints.into_iter().map(|dp| (dp.id, dp)).collect();
        Self {
            table: Mutex::new(table),
        }
    }

    fn table(&self) -> StoreResult<std::sync::MutexGuard<'_, BTreeMap<DatapointId, Datapoint>>> {
        self.table
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl DatapointStore for MemoryStore {
    async fn get(&self, id: DatapointId) -> StoreResult<Datapoint> {
        self.table()?
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> StoreResult<Vec<Datapoint>> {
        Ok(self.table()?.values().cloned().collect())
    }

    async fn insert(&self, datapoint: Datapoint) -> StoreResult<Datapoint> {
        let mut table = self.table()?;
        insert_into(&mut table, datapoint)
    }

    async fn update(&self, datapoint: &Datapoint) -> StoreResult<Datapoint> {
        let mut table = self.table()?;
        compare_and_set(&mut table, datapoint)
    }
}
