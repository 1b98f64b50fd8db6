//! Debounced keyed stores
//!
//! A [`KeyedStore`] keeps records in memory and snapshots them to a JSON
//! file on a timer, on stop and on reset. Snapshots are written to a
//! temporary file and renamed into place.

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::types::{DevicePatch, DeviceState, EntityState, DEVICE_ID_FIELD};
use crate::{Error, Result};

/// Default flush interval
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(60);

/// Snapshot file of the entity store
pub const STATE_FILE: &str = "state.json";
/// Snapshot file of the device store
pub const DEVICES_FILE: &str = "devices.json";

/// A record that can be created from, and merged with, a patch
pub trait Record<K>: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Patch;

    /// Build a new record for `key`
    fn from_patch(key: &K, patch: Self::Patch) -> Self;

    /// Shallow merge; fields absent from the patch are kept
    fn merge(&mut self, patch: Self::Patch);
}

impl Record<String> for EntityState {
    type Patch = Map<String, Value>;

    fn from_patch(key: &String, mut patch: Self::Patch) -> Self {
        patch.remove("id");
        Self {
            id: key.clone(),
            fields: patch,
        }
    }

    fn merge(&mut self, mut patch: Self::Patch) {
        patch.remove("id");
        self.fields.extend(patch);
    }
}

impl Record<String> for DeviceState {
    type Patch = DevicePatch;

    fn from_patch(key: &String, patch: Self::Patch) -> Self {
        let mut device = DeviceState {
            id: key.clone(),
            original_name: key.clone(),
            name: key.clone(),
            ..Default::default()
        };
        device.merge(patch);
        device
    }

    fn merge(&mut self, patch: Self::Patch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(original_name) = patch.original_name {
            self.original_name = original_name;
        }
        if let Some(protocol) = patch.protocol {
            self.protocol = protocol;
        }
        if let Some(subtype) = patch.subtype {
            self.subtype = subtype;
        }
        if let Some(subtype_name) = patch.subtype_name {
            self.subtype_name = subtype_name;
        }
        if let Some(sensors) = patch.sensors {
            self.sensors = sensors;
        }
        if let Some(binary_sensors) = patch.binary_sensors {
            self.binary_sensors = binary_sensors;
        }
        if let Some(switches) = patch.switches {
            self.switches = switches;
        }
        if let Some(covers) = patch.covers {
            self.covers = covers;
        }
        if let Some(selects) = patch.selects {
            self.selects = selects;
        }
    }
}

/// In-memory map with optional JSON snapshot persistence
pub struct KeyedStore<K, R> {
    name: String,
    path: Option<PathBuf>,
    save_interval: Duration,
    entries: RwLock<BTreeMap<K, R>>,
    dirty: AtomicBool,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

/// Entity state store, keyed by entity id
pub type EntityStore = KeyedStore<String, EntityState>;
/// Device metadata store, keyed by device id
pub type DeviceStore = KeyedStore<String, DeviceState>;

impl<K, R> KeyedStore<K, R>
where
    K: Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
    R: Record<K>,
{
    /// Store that never touches disk
    pub fn in_memory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            save_interval: DEFAULT_SAVE_INTERVAL,
            entries: RwLock::new(BTreeMap::new()),
            dirty: AtomicBool::new(false),
            flush_task: Mutex::new(None),
        }
    }

    /// Store persisted to `path`
    pub fn persistent(name: &str, path: impl Into<PathBuf>, save_interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            path: Some(path.into()),
            save_interval,
            entries: RwLock::new(BTreeMap::new()),
            dirty: AtomicBool::new(false),
            flush_task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the snapshot, if any
    ///
    /// A missing file leaves the store empty. A malformed file is logged
    /// and also leaves the store empty.
    pub fn load(&self) {
        let Some(path) = &self.path else {
            return;
        };

        let loaded = match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<BTreeMap<K, R>>(&text) {
                Ok(map) => map,
                Err(e) => {
                    warn!("{} snapshot {} is malformed, starting empty: {}", self.name, path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} snapshot {} not found", self.name, path.display());
                BTreeMap::new()
            }
            Err(e) => {
                warn!("{} snapshot {} unreadable: {}", self.name, path.display(), e);
                BTreeMap::new()
            }
        };

        info!("Loaded {} {} records", loaded.len(), self.name);
        *self.entries.write() = loaded;
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Load and start the periodic flush timer
    pub fn start(self: &Arc<Self>) {
        self.load();

        if self.path.is_none() {
            return;
        }

        let store = Arc::clone(self);
        let interval = self.save_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if store.dirty.load(Ordering::SeqCst) {
                    store.save_logged();
                }
            }
        });

        if let Some(old) = self.flush_task.lock().replace(handle) {
            old.abort();
        }
    }

    /// Cancel the flush timer and write a final snapshot
    pub fn stop(&self) {
        if let Some(handle) = self.flush_task.lock().take() {
            handle.abort();
        }
        self.save_logged();
    }

    /// Write the snapshot (temp file + rename)
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = {
            let entries = self.entries.read();
            serde_json::to_string_pretty(&*entries)?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Persistence(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)
            .map_err(|e| Error::Persistence(format!("write {}: {}", temp_path.display(), e)))?;
        fs::rename(&temp_path, path)
            .map_err(|e| Error::Persistence(format!("rename {}: {}", path.display(), e)))?;

        self.dirty.store(false, Ordering::SeqCst);
        debug!("Saved {} snapshot to {}", self.name, path.display());
        Ok(())
    }

    fn save_logged(&self) {
        if let Err(e) = self.save() {
            error!("Failed to save {} snapshot: {}", self.name, e);
        }
    }

    /// Clear every record and save immediately
    pub fn reset(&self) {
        self.entries.write().clear();
        self.dirty.store(true, Ordering::SeqCst);
        self.save_logged();
        info!("Reset {} store", self.name);
    }

    pub fn get(&self, key: &K) -> Option<R> {
        self.entries.read().get(key).cloned()
    }

    pub fn get_all(&self) -> Vec<R> {
        self.entries.read().values().cloned().collect()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Upsert: create from the patch, or shallow-merge into the existing record
    pub fn set(&self, key: K, patch: R::Patch) -> R {
        let mut entries = self.entries.write();
        let record = match entries.get_mut(&key) {
            Some(existing) => {
                existing.merge(patch);
                existing.clone()
            }
            None => {
                let record = R::from_patch(&key, patch);
                entries.insert(key, record.clone());
                record
            }
        };
        self.dirty.store(true, Ordering::SeqCst);
        record
    }

    pub fn remove(&self, key: &K) -> Option<R> {
        let removed = self.entries.write().remove(key);
        if removed.is_some() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        removed
    }

    /// First record matching the predicate
    pub fn find<F>(&self, predicate: F) -> Option<R>
    where
        F: Fn(&R) -> bool,
    {
        self.entries.read().values().find(|r| predicate(r)).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }
}

impl KeyedStore<String, EntityState> {
    /// Every entity belonging to a device
    pub fn get_by_device_id(&self, device_id: &str) -> Vec<EntityState> {
        self.entries
            .read()
            .values()
            .filter(|e| e.fields.get(DEVICE_ID_FIELD).and_then(Value::as_str) == Some(device_id))
            .cloned()
            .collect()
    }
}

impl KeyedStore<String, DeviceState> {
    /// Device by display name
    pub fn get_by_name(&self, name: &str) -> Option<DeviceState> {
        self.find(|d| d.name == name)
    }
}

impl<K, R> Drop for KeyedStore<K, R> {
    fn drop(&mut self) {
        if let Some(handle) = self.flush_task.get_mut().take() {
            handle.abort();
        }
    }
}
