use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, TrackbitError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Habits,
    HabitLogs,
    Streaks,
    Routines,
    RoutineLogs,
    HabitGoals,
    Profiles,
    HabitRecommendations,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Habits => "habits",
            RecordKind::HabitLogs => "habit_logs",
            RecordKind::Streaks => "streaks",
            RecordKind::Routines => "routines",
            RecordKind::RoutineLogs => "routine_logs",
            RecordKind::HabitGoals => "habit_goals",
            RecordKind::Profiles => "profiles",
            RecordKind::HabitRecommendations => "habit_recommendations",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend collaborator. Records are opaque JSON objects with stable ids; updates are
/// last-write-wins per record.
pub trait RecordStore: Send + Sync {
    fn upsert(&self, user_id: &str, kind: RecordKind, id: &str, record: Value) -> Result<()>;
    fn get(&self, user_id: &str, kind: RecordKind, id: &str) -> Result<Option<Value>>;
    fn delete(&self, user_id: &str, kind: RecordKind, id: &str) -> Result<bool>;
    fn list(&self, user_id: &str, kind: RecordKind) -> Result<Vec<Value>>;

    fn find_by_field(
        &self,
        user_id: &str,
        kind: RecordKind,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>> {
        Ok(self
            .list(user_id, kind)?
            .into_iter()
            .filter(|record| record.get(field) == Some(value))
            .collect())
    }
}

/// A typed record that knows which collection it lives in.
pub trait Record: Serialize + DeserializeOwned {
    const KIND: RecordKind;

    fn record_id(&self) -> String;
}

/// Typed view over a [`RecordStore`] scoped to one owning user.
#[derive(Clone, Copy)]
pub struct Records<'a> {
    store: &'a dyn RecordStore,
    user_id: &'a str,
}

impl<'a> Records<'a> {
    pub fn new(store: &'a dyn RecordStore, user_id: &'a str) -> Self {
        Self { store, user_id }
    }

    pub fn save<T: Record>(&self, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.store
            .upsert(self.user_id, T::KIND, &record.record_id(), value)
    }

    pub fn remove<T: Record>(&self, id: &str) -> Result<bool> {
        self.store.delete(self.user_id, T::KIND, id)
    }

    pub fn load<T: Record>(&self, id: &str) -> Result<Option<T>> {
        self.store
            .get(self.user_id, T::KIND, id)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(TrackbitError::from)
    }

    pub fn load_all<T: Record>(&self) -> Result<Vec<T>> {
        self.store
            .list(self.user_id, T::KIND)?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(TrackbitError::from))
            .collect()
    }

    pub fn find<T: Record>(&self, field: &str, value: impl Serialize) -> Result<Vec<T>> {
        let needle = serde_json::to_value(value)?;
        self.store
            .find_by_field(self.user_id, T::KIND, field, &needle)?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(TrackbitError::from))
            .collect()
    }
}

type Collections = BTreeMap<String, BTreeMap<RecordKind, BTreeMap<String, Value>>>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_collections(collections: Collections) -> Self {
        Self {
            collections: RwLock::new(collections),
        }
    }

    fn snapshot(&self) -> Collections {
        self.collections.read().clone()
    }
}

impl RecordStore for MemoryStore {
    fn upsert(&self, user_id: &str, kind: RecordKind, id: &str, record: Value) -> Result<()> {
        self.collections
            .write()
            .entry(user_id.to_string())
            .or_default()
            .entry(kind)
            .or_default()
            .insert(id.to_string(), record);
        Ok(())
    }

    fn get(&self, user_id: &str, kind: RecordKind, id: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .get(user_id)
            .and_then(|kinds| kinds.get(&kind))
            .and_then(|records| records.get(id))
            .cloned())
    }

    fn delete(&self, user_id: &str, kind: RecordKind, id: &str) -> Result<bool> {
        Ok(self
            .collections
            .write()
            .get_mut(user_id)
            .and_then(|kinds| kinds.get_mut(&kind))
            .and_then(|records| records.remove(id))
            .is_some())
    }

    fn list(&self, user_id: &str, kind: RecordKind) -> Result<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .get(user_id)
            .and_then(|kinds| kinds.get(&kind))
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// Persists every collection into a single JSON document. Each mutation rewrites the file
/// through a sibling temp file so a crash never leaves a half-written snapshot.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
    write_lock: parking_lot::Mutex<()>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let collections: Collections = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Collections::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            Collections::new()
        };
        debug!(path = %path.display(), users = collections.len(), "opened json store");
        Ok(Self {
            path,
            inner: MemoryStore::from_collections(collections),
            write_lock: parking_lot::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let payload = serde_json::to_string_pretty(&self.inner.snapshot())?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl RecordStore for JsonFileStore {
    fn upsert(&self, user_id: &str, kind: RecordKind, id: &str, record: Value) -> Result<()> {
        let previous = self.inner.get(user_id, kind, id)?;
        self.inner.upsert(user_id, kind, id, record)?;
        if let Err(err) = self.flush() {
            match previous {
                Some(prev) => self.inner.upsert(user_id, kind, id, prev)?,
                None => {
                    self.inner.delete(user_id, kind, id)?;
                }
            }
            return Err(err);
        }
        Ok(())
    }

    fn get(&self, user_id: &str, kind: RecordKind, id: &str) -> Result<Option<Value>> {
        self.inner.get(user_id, kind, id)
    }

    fn delete(&self, user_id: &str, kind: RecordKind, id: &str) -> Result<bool> {
        let previous = self.inner.get(user_id, kind, id)?;
        let removed = self.inner.delete(user_id, kind, id)?;
        if removed {
            if let Err(err) = self.flush() {
                if let Some(prev) = previous {
                    self.inner.upsert(user_id, kind, id, prev)?;
                }
                return Err(err);
            }
        }
        Ok(removed)
    }

    fn list(&self, user_id: &str, kind: RecordKind) -> Result<Vec<Value>> {
        self.inner.list(user_id, kind)
    }
}
