//! Generic file-backed JSON collection.
//!
//! Generalizes the teacher's `sessions::store::SessionStore` (plain
//! `RwLock<HashMap<..>>` flushed to one JSON file) to every entity the
//! Store Gateway owns, adding a write-to-temp-then-rename step so a crash
//! mid-write can never leave a truncated file behind.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};

use rl_domain::error::{Error, Result};

/// A named collection of records, each identified by a string id, backed by
/// one JSON file on disk.
pub struct JsonTable<T> {
    path: PathBuf,
    rows: RwLock<HashMap<String, T>>,
}

impl<T> JsonTable<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// Load `dir/<name>.json`, creating an empty table if absent.
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(dir).map_err(Error::Io)?;
        let path = dir.join(format!("{name}.json"));
        let rows = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.rows.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<T> {
        self.rows.read().values().cloned().collect()
    }

    pub fn insert(&self, id: String, value: T) -> Result<()> {
        self.rows.write().insert(id, value);
        self.flush()
    }

    /// Mutate an existing row in place. Returns `Error::NotFound` if absent.
    pub fn update<F>(&self, id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut T),
    {
        let updated = {
            let mut rows = self.rows.write();
            let row = rows
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("row {id} not found")))?;
            f(row);
            row.clone()
        };
        self.flush()?;
        Ok(updated)
    }

    pub fn remove(&self, id: &str) -> Result<Option<T>> {
        let removed = self.rows.write().remove(id);
        self.flush()?;
        Ok(removed)
    }

    /// Direct access for multi-row atomic transitions (e.g. blocked-by
    /// cascades) that must be computed and written under one lock hold.
    pub fn with_write<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut HashMap<String, T>) -> R,
    {
        let result = {
            let mut rows = self.rows.write();
            f(&mut rows)
        };
        self.flush()?;
        Ok(result)
    }

    fn flush(&self) -> Result<()> {
        let rows = self.rows.read();
        let json = serde_json::to_string_pretty(&*rows).map_err(Error::Json)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(Error::Io)?;
        fs::rename(&tmp, &self.path).map_err(Error::Io)?;
        Ok(())
    }
}
