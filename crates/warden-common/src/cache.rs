//! Shared key-value cache.
//!
//! Several processes read the same identity records and the same
//! used-passcode dictionaries. Every operation here is atomic at the
//! granularity of one key; nothing spans keys.

use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use fd_lock::RwLock;
use serde::{Deserialize, Serialize};

use crate::persist;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store with string values, string dictionaries and string sets.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    /// Drop a key of any shape. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), CacheError>;

    fn dict_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;
    fn dict_set(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError>;
    fn dict_remove(&self, key: &str, field: &str) -> Result<(), CacheError>;
    /// Insert `field` only if the dictionary does not hold it yet.
    /// Returns whether this call inserted it.
    fn dict_set_if_absent(&self, key: &str, field: &str, value: &str)
        -> Result<bool, CacheError>;
    /// Remove `field` only while it still holds `expected`.
    fn dict_remove_if_eq(&self, key: &str, field: &str, expected: &str)
        -> Result<bool, CacheError>;

    fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError>;
    fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError>;
    fn set_members(&self, key: &str) -> Result<BTreeSet<String>, CacheError>;
}

#[derive(Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    values: HashMap<String, String>,
    #[serde(default)]
    dicts: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    sets: HashMap<String, BTreeSet<String>>,
}

impl Tables {
    fn remove(&mut self, key: &str) {
        self.values.remove(key);
        self.dicts.remove(key);
        self.sets.remove(key);
    }

    fn dict_set(&mut self, key: &str, field: &str, value: &str) {
        self.dicts
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    fn dict_remove(&mut self, key: &str, field: &str) {
        if let Some(dict) = self.dicts.get_mut(key) {
            dict.remove(field);
            if dict.is_empty() {
                self.dicts.remove(key);
            }
        }
    }

    fn dict_set_if_absent(&mut self, key: &str, field: &str, value: &str) -> bool {
        let dict = self.dicts.entry(key.to_string()).or_default();
        if dict.contains_key(field) {
            return false;
        }
        dict.insert(field.to_string(), value.to_string());
        true
    }

    fn dict_remove_if_eq(&mut self, key: &str, field: &str, expected: &str) -> bool {
        let matched = self
            .dicts
            .get(key)
            .and_then(|dict| dict.get(field))
            .is_some_and(|value| value == expected);
        if matched {
            self.dict_remove(key, field);
        }
        matched
    }

    fn set_add(&mut self, key: &str, member: &str) {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
    }

    fn set_remove(&mut self, key: &str, member: &str) {
        if let Some(set) = self.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                self.sets.remove(key);
            }
        }
    }
}

/// Process-local [`KvStore`] behind a single mutex.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A panic while holding the lock cannot leave a half-written entry:
        // every mutation is a single map call.
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.tables().values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.tables()
            .values
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.tables().remove(key);
        Ok(())
    }

    fn dict_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        Ok(self.tables().dicts.get(key).cloned().unwrap_or_default())
    }

    fn dict_set(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.tables().dict_set(key, field, value);
        Ok(())
    }

    fn dict_remove(&self, key: &str, field: &str) -> Result<(), CacheError> {
        self.tables().dict_remove(key, field);
        Ok(())
    }

    fn dict_set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, CacheError> {
        Ok(self.tables().dict_set_if_absent(key, field, value))
    }

    fn dict_remove_if_eq(
        &self,
        key: &str,
        field: &str,
        expected: &str,
    ) -> Result<bool, CacheError> {
        Ok(self.tables().dict_remove_if_eq(key, field, expected))
    }

    fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.tables().set_add(key, member);
        Ok(())
    }

    fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.tables().set_remove(key, member);
        Ok(())
    }

    fn set_members(&self, key: &str) -> Result<BTreeSet<String>, CacheError> {
        Ok(self.tables().sets.get(key).cloned().unwrap_or_default())
    }
}

/// [`KvStore`] persisted as one private JSON file.
///
/// Every operation re-reads the file and writes it back atomically, so
/// successive processes see each other's entries. An advisory lock on a
/// sibling `.lock` file serializes writers across handles and processes.
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, CacheError> {
        let lock = self.open_lock()?;
        let _guard = lock.read().map_err(|e| self.unavailable(e))?;
        Ok(f(&self.load()?))
    }

    fn update<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, CacheError> {
        let mut lock = self.open_lock()?;
        let _guard = lock.write().map_err(|e| self.unavailable(e))?;
        let mut tables = self.load()?;
        let out = f(&mut tables);
        persist::write_json_private(&self.path, &tables).map_err(|e| self.unavailable(e))?;
        Ok(out)
    }

    fn open_lock(&self) -> Result<RwLock<File>, CacheError> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.unavailable(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| self.unavailable(e))?;
        Ok(RwLock::new(file))
    }

    fn load(&self) -> Result<Tables, CacheError> {
        persist::read_json_or_default(&self.path).map_err(|e| self.unavailable(e))
    }

    fn unavailable(&self, e: std::io::Error) -> CacheError {
        CacheError::Unavailable(format!("{}: {e}", self.path.display()))
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.read(|t| t.values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.update(|t| {
            t.values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.update(|t| t.remove(key))
    }

    fn dict_get_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.read(|t| t.dicts.get(key).cloned().unwrap_or_default())
    }

    fn dict_set(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.update(|t| t.dict_set(key, field, value))
    }

    fn dict_remove(&self, key: &str, field: &str) -> Result<(), CacheError> {
        self.update(|t| t.dict_remove(key, field))
    }

    fn dict_set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, CacheError> {
        self.update(|t| t.dict_set_if_absent(key, field, value))
    }

    fn dict_remove_if_eq(
        &self,
        key: &str,
        field: &str,
        expected: &str,
    ) -> Result<bool, CacheError> {
        self.update(|t| t.dict_remove_if_eq(key, field, expected))
    }

    fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.update(|t| t.set_add(key, member))
    }

    fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.update(|t| t.set_remove(key, member))
    }

    fn set_members(&self, key: &str) -> Result<BTreeSet<String>, CacheError> {
        self.read(|t| t.sets.get(key).cloned().unwrap_or_default())
    }
}
