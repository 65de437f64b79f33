use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::PreferenceError;
use crate::record::{PreferenceRecord, PrincipalId, ScopeId, record_key};

type RecordMap = BTreeMap<String, PreferenceRecord>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_records: usize,
    pub total_preferences: usize,
    pub consented_records: usize,
}

/// JSON-file backed map of preference records keyed by `"{scope}_{principal}"`.
///
/// The in-memory map always mirrors what was last written to disk: a write
/// that fails leaves the previous state in place.
pub struct PreferenceStore {
    path: PathBuf,
    records: RwLock<RecordMap>,
    persist_lock: Mutex<()>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    recovered_from_corruption: bool,
}

impl PreferenceStore {
    /// Loads `path`. A missing file is an empty store; an unreadable or
    /// unparsable one is logged and replaced by an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (records, recovered_from_corruption) = match load_records(&path) {
            Ok(records) => (records, false),
            Err(err) => {
                warn!("{err}; starting with empty preferences");
                (RecordMap::new(), true)
            }
        };
        debug!(
            "preference store opened at {} with {} records",
            path.display(),
            records.len()
        );
        Self {
            path,
            records: RwLock::new(records),
            persist_lock: Mutex::new(()),
            key_locks: Mutex::new(HashMap::new()),
            recovered_from_corruption,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn recovered_from_corruption(&self) -> bool {
        self.recovered_from_corruption
    }

    pub fn get(&self, scope: ScopeId, principal: PrincipalId) -> Option<PreferenceRecord> {
        read_unpoisoned(&self.records)
            .get(&record_key(scope, principal))
            .cloned()
    }

    pub fn records_in_scope(&self, scope: ScopeId) -> Vec<PreferenceRecord> {
        read_unpoisoned(&self.records)
            .values()
            .filter(|record| record.scope == scope)
            .cloned()
            .collect()
    }

    /// Replaces the record stored under the record's own key.
    pub fn upsert(&self, record: PreferenceRecord) -> Result<(), PreferenceError> {
        self.commit(|records| {
            records.insert(record.key(), record);
        })
    }

    /// Returns whether a record was removed. Absent records are not an error.
    pub fn remove_record(
        &self,
        scope: ScopeId,
        principal: PrincipalId,
    ) -> Result<bool, PreferenceError> {
        let key = record_key(scope, principal);
        if !read_unpoisoned(&self.records).contains_key(&key) {
            return Ok(false);
        }
        self.commit(|records| records.remove(&key).is_some())
    }

    /// Removes every record in `scope` while holding each of their key locks,
    /// so no in-flight mutation can write a removed record back.
    pub fn remove_all_for_scope(&self, scope: ScopeId) -> Result<usize, PreferenceError> {
        let keys: Vec<String> = self
            .records_in_scope(scope)
            .iter()
            .map(PreferenceRecord::key)
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        self.with_keys_locked(keys, || {
            self.commit(|records| {
                let before = records.len();
                records.retain(|_, record| record.scope != scope);
                before - records.len()
            })
        })
    }

    pub fn stats(&self) -> StoreStats {
        let records = read_unpoisoned(&self.records);
        StoreStats {
            total_records: records.len(),
            total_preferences: records.values().map(|r| r.preferences.len()).sum(),
            consented_records: records.values().filter(|r| r.consent_given).count(),
        }
    }

    /// Rewrites the backing file from memory.
    pub fn flush(&self) -> Result<(), PreferenceError> {
        self.commit(|_| ())
    }

    /// Runs `f` while holding the lock for one `(scope, principal)` key.
    /// Calls for different keys do not wait on each other.
    pub fn with_key_locked<R>(
        &self,
        scope: ScopeId,
        principal: PrincipalId,
        f: impl FnOnce() -> R,
    ) -> R {
        self.with_keys_locked(vec![record_key(scope, principal)], f)
    }

    /// Locks are always taken in sorted key order, so two multi-key callers
    /// cannot deadlock each other.
    fn with_keys_locked<R>(&self, mut keys: Vec<String>, f: impl FnOnce() -> R) -> R {
        keys.sort();
        keys.dedup();
        let locks: Vec<Arc<Mutex<()>>> = {
            let mut registry = lock_unpoisoned(&self.key_locks);
            keys.iter()
                .map(|key| registry.entry(key.clone()).or_default().clone())
                .collect()
        };

        let result = {
            let _guards: Vec<MutexGuard<'_, ()>> =
                locks.iter().map(|lock| lock_unpoisoned(lock)).collect();
            f()
        };

        let mut registry = lock_unpoisoned(&self.key_locks);
        for (key, lock) in keys.iter().zip(&locks) {
            // Only the registry and this call still hold the lock: nobody is waiting.
            if Arc::strong_count(lock) == 2 {
                registry.remove(key);
            }
        }
        result
    }

    /// Applies `change` to a copy of the map, persists the copy, and only then
    /// publishes it. Serialized by `persist_lock` so concurrent writers never
    /// drop each other's records from the file.
    fn commit<R>(&self, change: impl FnOnce(&mut RecordMap) -> R) -> Result<R, PreferenceError> {
        let _persist = lock_unpoisoned(&self.persist_lock);
        let mut next = read_unpoisoned(&self.records).clone();
        let result = change(&mut next);
        write_records(&self.path, &next).map_err(|source| PreferenceError::StorageWrite {
            path: self.path.clone(),
            source,
        })?;
        *self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
        Ok(result)
    }
}

fn load_records(path: &Path) -> Result<RecordMap, PreferenceError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RecordMap::new()),
        Err(err) => {
            return Err(PreferenceError::StorageCorrupt {
                path: path.to_path_buf(),
                detail: err.to_string(),
            });
        }
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(RecordMap::new());
    }
    serde_json::from_slice(&raw).map_err(|err| PreferenceError::StorageCorrupt {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })
}

fn write_records(path: &Path, records: &RecordMap) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let serialized = serde_json::to_vec_pretty(records).map_err(io::Error::other)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&serialized)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_unpoisoned(records: &RwLock<RecordMap>) -> std::sync::RwLockReadGuard<'_, RecordMap> {
    records.read().unwrap_or_else(PoisonError::into_inner)
}
