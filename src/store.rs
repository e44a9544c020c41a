//! Key/value persistence for the alarm and the custom stations.
//!
//! Every save writes the complete record. A record that can't be read back is
//! treated as missing so callers fall back to a freshly constructed default.

use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;

pub trait Store {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn write(&mut self, key: &str, contents: &str) -> Result<(), StoreError>;
}

/// Loads and decodes a record. Missing, unreadable and undecodable records
/// all come back as `None`; the latter two are logged.
pub fn load<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Option<T> {
    let text = match store.read(key) {
        Ok(Some(text)) => text,
        Ok(None) => return None,
        Err(e) => {
            log::warn!("{e}, starting from defaults");
            return None;
        }
    };
    match toml::from_str(&text) {
        Ok(record) => Some(record),
        Err(source) => {
            let e = StoreError::Decode {
                key: key.to_string(),
                source,
            };
            log::warn!("{e}, starting from defaults");
            None
        }
    }
}

pub fn save<T: Serialize>(store: &mut dyn Store, key: &str, record: &T) -> Result<(), StoreError> {
    let text = toml::to_string(record).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.write(key, &text)
}

/// One `<key>.toml` file per record inside a directory.
#[derive(Debug, Clone)]
pub struct TomlDirStore {
    dir: PathBuf,
}

impl TomlDirStore {
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.toml"))
    }
}

impl Store for TomlDirStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path(key);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn write(&mut self, key: &str, contents: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path(key);
        // write next to the target and rename so a crash never leaves half a record
        let staging = self.dir.join(format!(".{key}.toml.tmp"));
        fs::write(&staging, contents).map_err(|source| StoreError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &path).map_err(|source| StoreError::Io { path, source })
    }
}

/// In-memory store. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// puts raw text under `key`, bypassing encoding
    pub fn insert_raw(&self, key: &str, contents: &str) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), contents.to_string());
    }
}

impl Store for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn write(&mut self, key: &str, contents: &str) -> Result<(), StoreError> {
        self.insert_raw(key, contents);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        name: String,
        count: u32,
    }

    #[test]
    fn save_then_load_reads_your_writes() {
        let mut store = MemoryStore::new();
        let record = Record {
            name: "alarm".to_string(),
            count: 2,
        };
        save(&mut store, "record", &record).unwrap();

        assert_eq!(load::<Record>(&store, "record"), Some(record));
    }

    #[test]
    fn garbage_loads_as_missing() {
        let store = MemoryStore::new();
        store.insert_raw("record", "name = [unterminated");

        assert_eq!(load::<Record>(&store, "record"), None);
        assert_eq!(load::<Record>(&store, "other"), None);
    }

    #[test]
    fn toml_dir_store_round_trips_on_disk() {
        let dir = std::env::temp_dir().join(format!("iskr_clock-store-{}", uuid::Uuid::new_v4()));
        let mut store = TomlDirStore::new(dir.clone());
        assert_eq!(load::<Record>(&store, "record"), None);

        let record = Record {
            name: "stations".to_string(),
            count: 17,
        };
        save(&mut store, "record", &record).unwrap();
        assert!(dir.join("record.toml").exists());
        assert!(!dir.join(".record.toml.tmp").exists());
        assert_eq!(load::<Record>(&store, "record"), Some(record));

        fs::remove_dir_all(dir).unwrap();
    }
}
