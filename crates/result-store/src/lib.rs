//! Durable key-value storage plus the result publication channel.
//!
//! Two concerns the original design conflated are kept separate here: a small
//! persistent key-value store (last scrape results, deferred-tab map) and a
//! broadcast channel that tells consumers the result set changed. Every
//! operation reads and writes the backing store directly; nothing caches a
//! stale copy between event-handler invocations.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use reportscope_core_types::ReportResult;

/// Key holding the ordered result rows of the last completed run.
pub const KEY_RESULTS: &str = "scrapeResults";
/// Companion row count.
pub const KEY_RESULTS_COUNT: &str = "scrapeResults_count";
/// Companion completion timestamp (unix millis).
pub const KEY_RESULTS_TS: &str = "scrapeResults_ts";
/// Deferred-navigation map, tab id -> pending URL.
pub const KEY_DEFERRED_TABS: &str = "deferredTabs";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Minimal async key-value surface shared by all backends.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    async fn remove(&self, keys: &[&str]) -> Result<(), StoreError>;
}

/// In-memory backend for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
        for key in keys {
            self.entries.remove(*key);
        }
        Ok(())
    }
}

/// JSON-file backend scoped to a profile directory. The file on disk is the
/// single source of truth: every operation reloads it before mutating, so
/// independent handles over the same path stay coherent.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<serde_json::Map<String, Value>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let value: Value = serde_json::from_slice(&bytes)?;
                Ok(value.as_object().cloned().unwrap_or_default())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Default::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn persist(&self, map: &serde_json::Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write-then-rename keeps the store readable if we crash mid-write.
        let tmp = self.path.with_extension("tmp");
        {
            let file = fs::File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, map)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.load()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut map = self.load()?;
        map.insert(key.to_string(), value);
        self.persist(&map)
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut map = self.load()?;
        let mut changed = false;
        for key in keys {
            changed |= map.remove(*key).is_some();
        }
        if changed {
            self.persist(&map)?;
        }
        Ok(())
    }
}

/// Notification emitted whenever the stored result set changes.
#[derive(Clone, Debug)]
pub struct ResultsChanged {
    pub count: usize,
    pub ts_ms: i64,
}

/// Result set as read back from the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredResults {
    pub rows: Vec<ReportResult>,
    pub count: usize,
    pub ts_ms: i64,
}

/// Typed facade over the `scrapeResults*` keys. One completed run is stored
/// at a time; publishing overwrites the previous run in full.
pub struct ResultStore {
    kv: Arc<dyn KvStore>,
    changes: broadcast::Sender<ResultsChanged>,
}

impl ResultStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self { kv, changes }
    }

    pub fn kv(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv)
    }

    /// Persists the full ordered row sequence with count and timestamp, then
    /// notifies subscribers. Called exactly once per completed run.
    pub async fn publish(&self, rows: &[ReportResult]) -> Result<ResultsChanged, StoreError> {
        let ts_ms = Utc::now().timestamp_millis();
        self.kv
            .set(KEY_RESULTS, serde_json::to_value(rows)?)
            .await?;
        self.kv
            .set(KEY_RESULTS_COUNT, Value::from(rows.len()))
            .await?;
        self.kv.set(KEY_RESULTS_TS, Value::from(ts_ms)).await?;
        let changed = ResultsChanged {
            count: rows.len(),
            ts_ms,
        };
        debug!(count = changed.count, "published scrape results");
        let _ = self.changes.send(changed.clone());
        Ok(changed)
    }

    /// Removes any previous run's rows and companion metadata.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.kv
            .remove(&[KEY_RESULTS, KEY_RESULTS_COUNT, KEY_RESULTS_TS])
            .await
    }

    /// Reads back the last completed run, if any.
    pub async fn load(&self) -> Result<Option<StoredResults>, StoreError> {
        let Some(rows) = self.kv.get(KEY_RESULTS).await? else {
            return Ok(None);
        };
        let rows: Vec<ReportResult> = serde_json::from_value(rows)?;
        let count = match self.kv.get(KEY_RESULTS_COUNT).await? {
            Some(v) => serde_json::from_value(v).unwrap_or(rows.len()),
            None => rows.len(),
        };
        let ts_ms = match self.kv.get(KEY_RESULTS_TS).await? {
            Some(v) => serde_json::from_value(v).unwrap_or_default(),
            None => 0,
        };
        Ok(Some(StoredResults { rows, count, ts_ms }))
    }

    /// Change stream; any number of consumers may subscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<ResultsChanged> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportscope_core_types::WorkItem;

    fn row(id: &str) -> ReportResult {
        ReportResult::failed(&WorkItem::parse(id).unwrap())
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", Value::from(1)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(Value::from(1)));
        store.remove(&["k", "missing"]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let first = JsonFileStore::new(&path);
        first.set("k", Value::from("v")).await.unwrap();
        drop(first);

        let second = JsonFileStore::new(&path);
        assert_eq!(second.get("k").await.unwrap(), Some(Value::from("v")));
    }

    #[tokio::test]
    async fn publish_overwrites_and_notifies() {
        let store = ResultStore::new(Arc::new(MemoryStore::new()));
        let mut changes = store.subscribe();

        store.publish(&[row("1"), row("2")]).await.unwrap();
        store.publish(&[row("3")]).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.count, 1);
        assert_eq!(loaded.rows[0].report_id, "3");
        assert!(loaded.ts_ms > 0);

        assert_eq!(changes.recv().await.unwrap().count, 2);
        assert_eq!(changes.recv().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn clear_removes_all_keys() {
        let kv = Arc::new(MemoryStore::new());
        let store = ResultStore::new(kv.clone());
        store.publish(&[row("9")]).await.unwrap();
        store.clear().await.unwrap();

        assert!(store.load().await.unwrap().is_none());
        assert!(kv.get(KEY_RESULTS_COUNT).await.unwrap().is_none());
        assert!(kv.get(KEY_RESULTS_TS).await.unwrap().is_none());
    }
}
