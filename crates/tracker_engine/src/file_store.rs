use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracker_core::{Datapoint, DatapointId};

use crate::store::{compare_and_set, insert_into, DatapointStore, StoreError, StoreResult};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("parent directory missing or not writable: {0}")]
    ParentDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Replace `target` with `content` by writing a sibling temp file and renaming it.
pub fn write_atomically(target: &Path, content: &[u8]) -> Result<(), PersistError> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.is_dir() {
        fs::create_dir_all(&dir).map_err(|e| PersistError::ParentDir(e.to_string()))?;
    }

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| PersistError::ParentDir(e.to_string()))?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(target).map_err(|e| PersistError::Io(e.error))?;
    Ok(())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    datapoints: Vec<Datapoint>,
}

/// A [`DatapointStore`] kept in one pretty-printed JSON document.
///
/// Every write rewrites the whole file atomically; a missing file reads as an
/// empty store.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> StoreResult<BTreeMap<DatapointId, Datapoint>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(unavailable(&self.path, err)),
        };
        let file: StoreFile =
            serde_json::from_str(&text).map_err(|err| unavailable(&self.path, err))?;
        Ok(file.datapoints.into_iter().map(|dp| (dp.id, dp)).collect())
    }

    fn write(&self, table: &BTreeMap<DatapointId, Datapoint>) -> StoreResult<()> {
        let file = StoreFile {
            datapoints: table.values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|err| unavailable(&self.path, err))?;
        write_atomically(&self.path, &json).map_err(|err| unavailable(&self.path, err))
    }

    fn modify<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<DatapointId, Datapoint>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let _lock = self
            .guard
            .lock()
            .map_err(|_| StoreError::Unavailable("file store lock poisoned".to_string()))?;
        let mut table = self.read()?;
        let value = change(&mut table)?;
        self.write(&table)?;
        Ok(value)
    }
}

fn unavailable(path: &Path, err: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("{}: {err}", path.display()))
}

#[async_trait::async_trait]
impl DatapointStore for JsonFileStore {
    async fn get(&self, id: DatapointId) -> StoreResult<Datapoint> {
        self.read()?.remove(&id).ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> StoreResult<Vec<Datapoint>> {
        Ok(self.read()?.into_values().collect())
    }

    async fn insert(&self, datapoint: Datapoint) -> StoreResult<Datapoint> {
        self.modify(|table| insert_into(table, datapoint))
    }

    async fn update(&self, datapoint: &Datapoint) -> StoreResult<Datapoint> {
        self.modify(|table| compare_and_set(table, datapoint))
    }
}
