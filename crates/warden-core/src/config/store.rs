//! Configuration store.
//!
//! Each category holds JSON content and a sequence id that increases by one on
//! every successful write.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use warden_proto::ConfigType;

use crate::error::Error;

const CONFIG_TREE_NAME: &[u8] = b"warden:config";

/// Content of one category with its sequence id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// JSON content.
    pub content: String,
    /// Sequence id of this content; 0 if never written.
    pub sequence_id: u64,
}

/// Backing store for security configuration.
pub trait ConfigStore: Send + Sync {
    /// Load a category. A never-written category loads as empty content at 0.
    fn load(&self, config_type: ConfigType) -> Result<ConfigEntry, Error>;

    /// Replace a category's content, returning the new sequence id.
    fn store(&self, config_type: ConfigType, content: &str) -> Result<u64, Error>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: RwLock<BTreeMap<ConfigType, ConfigEntry>>,
}

impl MemoryConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a category to exact content and sequence id.
    ///
    /// Used to model a store replica that lags behind or jumps ahead.
    pub fn put(&self, config_type: ConfigType, content: impl Into<String>, sequence_id: u64) {
        self.entries.write().insert(
            config_type,
            ConfigEntry {
                content: content.into(),
                sequence_id,
            },
        );
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, config_type: ConfigType) -> Result<ConfigEntry, Error> {
        Ok(self
            .entries
            .read()
            .get(&config_type)
            .cloned()
            .unwrap_or_default())
    }

    fn store(&self, config_type: ConfigType, content: &str) -> Result<u64, Error> {
        let mut entries = self.entries.write();
        let entry = entries.entry(config_type).or_default();
        entry.content = content.to_string();
        entry.sequence_id += 1;
        Ok(entry.sequence_id)
    }
}

/// Store persisted in a sled tree, one key per category.
pub struct SledConfigStore {
    _db: sled::Db,
    tree: sled::Tree,
    write_lock: Mutex<()>,
}

impl SledConfigStore {
    /// Open the config tree.
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        let tree = db.open_tree(CONFIG_TREE_NAME)?;
        Ok(Self {
            _db: db.clone(),
            tree,
            write_lock: Mutex::new(()),
        })
    }

    /// Open a database at `path` and its config tree.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let db = sled::open(path)?;
        Self::open(&db)
    }

    fn read_entry(&self, config_type: ConfigType) -> Result<ConfigEntry, Error> {
        match self.tree.get(config_type.as_str())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Deserialization(format!("config {}: {}", config_type, e))),
            None => Ok(ConfigEntry::default()),
        }
    }
}

impl ConfigStore for SledConfigStore {
    fn load(&self, config_type: ConfigType) -> Result<ConfigEntry, Error> {
        self.read_entry(config_type)
    }

    fn store(&self, config_type: ConfigType, content: &str) -> Result<u64, Error> {
        let _guard = self.write_lock.lock();
        let entry = ConfigEntry {
            content: content.to_string(),
            sequence_id: self.read_entry(config_type)?.sequence_id + 1,
        };
        let bytes = serde_json::to_vec(&entry).map_err(|e| Error::Serialization(e.to_string()))?;
        self.tree.insert(config_type.as_str(), bytes)?;
        self.tree.flush()?;
        tracing::debug!(config_type = %config_type, sequence_id = entry.sequence_id, "stored config");
        Ok(entry.sequence_id)
    }
}
