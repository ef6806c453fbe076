/*!
In-memory storage adapter implementation.
*/

use super::KeyValueStore;
use crate::{Result, StorageError};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Memory-based key-value store
///
/// Records live for as long as the value itself, which makes this the
/// session-scoped backend of a desktop host and a convenient test double.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StorageError {
    StorageError::storage("memory storage lock poisoned")
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut data = self.data.write().map_err(poisoned)?;
        data.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.data.write().map_err(poisoned)?.clear();
        Ok(())
    }

    fn length(&self) -> i64 {
        self.data
            .read()
            .map(|data| data.len() as i64)
            .unwrap_or_default()
    }

    fn key(&self, index: usize) -> Option<String> {
        let data = self.data.read().ok()?;
        data.keys().nth(index).cloned()
    }
}
