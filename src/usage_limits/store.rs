use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::platform::common::atomic_write;
use crate::usage_limits::error::StoreError;

/// Current on-disk schema version for every namespace
pub const SCHEMA_VERSION: u32 = 1;

/// Envelope read back for each namespace
#[derive(Debug, Deserialize)]
struct RecordFile<T> {
    schema_version: u32,
    namespace: String,
    records: Vec<T>,
}

/// Envelope as written
#[derive(Serialize)]
struct RecordFileRef<'a, T> {
    schema_version: u32,
    namespace: &'a str,
    records: &'a [T],
}

/// One versioned, atomically written record namespace
///
/// A `RecordNamespace` without a path keeps records in memory only, which is
/// what tests and dry runs use.
#[derive(Debug, Clone)]
pub struct RecordNamespace {
    name: &'static str,
    path: Option<PathBuf>,
}

impl RecordNamespace {
    pub fn on_disk(name: &'static str, path: impl Into<PathBuf>) -> Self {
        Self {
            name,
            path: Some(path.into()),
        }
    }

    pub fn in_memory(name: &'static str) -> Self {
        Self { name, path: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read all records; a missing file is an empty namespace
    pub fn read<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };

        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(path)?;
        self.decode(&content)
    }

    /// Read all records, degrading to an empty namespace on any failure
    pub fn read_or_empty<T: DeserializeOwned>(&self) -> Vec<T> {
        match self.read() {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "Ignoring unreadable '{}' records ({}); starting empty",
                    self.name, e
                );
                Vec::new()
            }
        }
    }

    /// Replace the namespace contents
    pub fn write<T: Serialize>(&self, records: &[T]) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = RecordFileRef {
            schema_version: SCHEMA_VERSION,
            namespace: self.name,
            records,
        };
        let content = serde_json::to_string_pretty(&file).map_err(StoreError::Encode)?;
        atomic_write(path, content.as_bytes())?;

        debug!("Wrote {} '{}' records to {}", records.len(), self.name, path.display());
        Ok(())
    }

    fn decode<T: DeserializeOwned>(&self, content: &str) -> Result<Vec<T>, StoreError> {
        // Check the envelope before the records so a newer schema is reported as such
        let envelope: RecordFile<serde_json::Value> =
            serde_json::from_str(content).map_err(StoreError::Decode)?;

        if envelope.schema_version != SCHEMA_VERSION {
            return Err(StoreError::UnsupportedVersion {
                namespace: self.name.to_string(),
                found: envelope.schema_version,
                expected: SCHEMA_VERSION,
            });
        }

        if envelope.namespace != self.name {
            return Err(StoreError::WrongNamespace {
                expected: self.name.to_string(),
                found: envelope.namespace,
            });
        }

        envelope
            .records
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StoreError::Decode))
            .collect()
    }
}

/// Mutex-guarded, disk-backed copy of one namespace
///
/// Every operation runs under the mutex, so a read-modify-write on one record
/// never interleaves with another. The file is re-read whenever its
/// modification time moves, which picks up writes from other processes; a
/// failed write leaves the in-memory copy authoritative until the next change
/// on disk.
#[derive(Debug)]
pub struct RecordCache<T> {
    namespace: RecordNamespace,
    state: Mutex<CacheState<T>>,
}

#[derive(Debug)]
struct CacheState<T> {
    records: Vec<T>,
    seen: Option<SystemTime>,
}

impl<T> RecordCache<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned,
{
    pub fn new(namespace: RecordNamespace) -> Self {
        let records = namespace.read_or_empty();
        let seen = modified_at(&namespace);
        Self {
            namespace,
            state: Mutex::new(CacheState { records, seen }),
        }
    }

    pub fn namespace(&self) -> &RecordNamespace {
        &self.namespace
    }

    /// Run a read-only view over the current records
    pub fn read<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        let state = self.lock_fresh();
        f(&state.records)
    }

    /// Mutate the records and persist them if anything changed
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> R {
        let mut state = self.lock_fresh();
        let before = state.records.clone();
        let result = f(&mut state.records);

        if state.records != before {
            match self.namespace.write(&state.records) {
                Ok(()) => state.seen = modified_at(&self.namespace),
                Err(e) => warn!(
                    "Failed to persist '{}' records, changes will not survive a restart: {}",
                    self.namespace.name, e
                ),
            }
        }

        result
    }

    fn lock_fresh(&self) -> MutexGuard<'_, CacheState<T>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let modified = modified_at(&self.namespace);
        if self.namespace.path.is_some() && modified != state.seen {
            debug!("'{}' records changed on disk, reloading", self.namespace.name);
            state.records = self.namespace.read_or_empty();
            state.seen = modified;
        }
        state
    }
}

fn modified_at(namespace: &RecordNamespace) -> Option<SystemTime> {
    namespace
        .path()
        .and_then(|path| std::fs::metadata(path).ok())
        .and_then(|meta| meta.modified().ok())
}
