//! Snapshot ownership, change notification, and sequential-cursor persistence.
//!
//! The manager is the configuration provider the engine consumes: it hands
//! out the current [`ConfigSnapshot`] behind an `Arc`, notifies subscribers
//! when a new snapshot is installed, and persists the sequential reply
//! cursors (trigger id → index) so progress survives a restart.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::config::{ConfigError, ConfigSnapshot};

/// Persistence backend for the sequential-cursor map.
pub trait CursorStore: Send + Sync {
    fn load(&self) -> Result<HashMap<String, u32>, ConfigError>;
    fn store(&self, cursors: &HashMap<String, u32>) -> Result<(), ConfigError>;
}

/// Cursor store backed by a JSON file. A missing file reads as an empty map.
pub struct JsonFileCursorStore {
    path: PathBuf,
}

impl JsonFileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CursorStore for JsonFileCursorStore {
    fn load(&self) -> Result<HashMap<String, u32>, ConfigError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, cursors: &HashMap<String, u32>) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(cursors)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// In-memory cursor store for tests and hosts without persistence.
#[derive(Default)]
pub struct MemoryCursorStore {
    inner: Mutex<HashMap<String, u32>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Result<HashMap<String, u32>, ConfigError> {
        Ok(self.inner.lock().clone())
    }

    fn store(&self, cursors: &HashMap<String, u32>) -> Result<(), ConfigError> {
        *self.inner.lock() = cursors.clone();
        Ok(())
    }
}

type Subscriber = Box<dyn Fn(&Arc<ConfigSnapshot>) + Send + Sync>;

/// Owns the current snapshot and the persisted cursor map.
pub struct ConfigManager {
    current: RwLock<Arc<ConfigSnapshot>>,
    subscribers: Mutex<Vec<Subscriber>>,
    cursors: Mutex<HashMap<String, u32>>,
    store: Box<dyn CursorStore>,
}

impl ConfigManager {
    /// Create a manager with an initial snapshot. Cursors are loaded from the
    /// store eagerly; a failing load logs and starts empty.
    pub fn new(snapshot: ConfigSnapshot, store: Box<dyn CursorStore>) -> Self {
        let cursors = store.load().unwrap_or_else(|e| {
            warn!(error = %e, "failed to load sequential reply cursors");
            HashMap::new()
        });
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            subscribers: Mutex::new(Vec::new()),
            cursors: Mutex::new(cursors),
            store,
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.read().clone()
    }

    /// Register a callback invoked with every newly installed snapshot.
    pub fn subscribe(&self, subscriber: impl Fn(&Arc<ConfigSnapshot>) + Send + Sync + 'static) {
        self.subscribers.lock().push(Box::new(subscriber));
    }

    /// Install a new snapshot, prune cursors for triggers that no longer
    /// exist in any profile, and notify subscribers. A panicking subscriber
    /// is contained so the remaining subscribers still run.
    pub fn apply(&self, snapshot: ConfigSnapshot) {
        let snapshot = Arc::new(snapshot);
        *self.current.write() = snapshot.clone();

        self.prune_cursors(&snapshot.all_trigger_ids());

        let subscribers = self.subscribers.lock();
        for subscriber in subscribers.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber(&snapshot)
            }));
            if result.is_err() {
                warn!("configuration subscriber panicked");
            }
        }
    }

    /// Current sequential cursor for a trigger (0 when absent).
    pub fn sequential_index(&self, trigger_id: &str) -> u32 {
        self.cursors.lock().get(trigger_id).copied().unwrap_or(0)
    }

    /// Record a trigger's sequential cursor. Index 0 is stored as an absent
    /// entry. Persistence failures log and leave the in-memory map
    /// authoritative.
    pub fn store_sequential_index(&self, trigger_id: &str, index: u32) {
        let mut cursors = self.cursors.lock();
        let changed = if index == 0 {
            cursors.remove(trigger_id).is_some()
        } else {
            cursors.insert(trigger_id.to_string(), index) != Some(index)
        };
        if changed {
            self.persist(&cursors);
        }
    }

    /// Drop cursor entries for triggers absent from `active_ids`.
    pub fn prune_cursors(&self, active_ids: &HashSet<String>) {
        let mut cursors = self.cursors.lock();
        let before = cursors.len();
        cursors.retain(|id, _| active_ids.contains(id));
        if cursors.len() != before {
            self.persist(&cursors);
        }
    }

    fn persist(&self, cursors: &HashMap<String, u32>) {
        if let Err(e) = self.store.store(cursors) {
            warn!(error = %e, "failed to persist sequential reply cursors");
        }
    }
}
