//! Persisted key-value snapshots: device id, report gate markers, candidate
//! store snapshot. Only the read/write contract matters here; the backing
//! store is a single JSON document loaded tolerantly (a corrupt file starts
//! empty, it never aborts startup).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub const DEVICE_ID_KEY: &str = "STATISTICS_DEVICE_ID";
pub const DAILY_REPORT_KEY: &str = "last_report_alive";
pub const LIFETIME_REPORT_KEY: &str = "first_install_reported";
pub const LOCAL_SNAPSHOT_KEY: &str = "STATISTICS_KEY";
pub const STORE_SNAPSHOT_KEY: &str = "candidate_store";

/// String key-value contract shared by the resolver and the telemetry gates.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    /// Returns false when the value could not be persisted.
    fn set(&self, key: &str, value: &str) -> bool;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        match self.values.lock() {
            Ok(mut map) => {
                map.insert(key.to_string(), value.to_string());
                true
            }
            Err(_) => false,
        }
    }
}

/// One JSON object on disk, rewritten on every set.
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`. A missing or unreadable
    /// file yields an empty store.
    pub fn open(path: PathBuf) -> Self {
        let cache = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<HashMap<String, String>>(&s).ok())
            .unwrap_or_default();
        Self {
            path,
            cache: Mutex::new(cache),
        }
    }

    fn flush(&self, map: &HashMap<String, String>) -> bool {
        if let Some(parent) = self.path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        match serde_json::to_string_pretty(map) {
            Ok(json) => std::fs::write(&self.path, json).is_ok(),
            Err(_) => false,
        }
    }
}

impl Storage for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        match self.cache.lock() {
            Ok(mut map) => {
                map.insert(key.to_string(), value.to_string());
                self.flush(&map)
            }
            Err(_) => false,
        }
    }
}

/// Load the persisted device id, or generate and persist a fresh one. A stored
/// id shorter than the reuse threshold is replaced.
pub fn device_id(storage: &dyn Storage) -> String {
    if let Some(cached) = storage.get(DEVICE_ID_KEY) {
        if lifeline_core::is_usable_device_id(&cached) {
            return cached;
        }
    }
    let id = lifeline_core::generate_device_id();
    storage.set(DEVICE_ID_KEY, &id);
    id
}
