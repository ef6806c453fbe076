/*!
File-backed local storage adapter implementation.
*/

use super::KeyValueStore;
use crate::{Result, StorageError};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tempfile::NamedTempFile;
use tracing::debug;

/// Persistent key-value store kept in a single JSON document on disk
///
/// The document is read once when the store is opened and rewritten on every
/// mutation. Rewrites go through a temporary file in the same directory that is
/// renamed over the document, so a crash never leaves a half-written file.
///
/// # Example
/// ```rust,no_run
/// use signal_storage_core::storage::{FileStorage, KeyValueStore};
///
/// let storage = FileStorage::in_dir("/var/lib/my-app")?;
/// storage.set("state", r#"{"count":1}"#)?;
/// # Ok::<(), signal_storage_core::StorageError>(())
/// ```
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    /// File name used by [`FileStorage::in_dir`]
    pub const DEFAULT_FILE_NAME: &'static str = "local-storage.json";

    /// Open (or lazily create) the store document at `path`
    ///
    /// A missing file is an empty store; the file is created on first write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| {
                StorageError::storage(format!(
                    "Failed to read storage file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), records = data.len(), "opened file storage");

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Open the store document named [`FileStorage::DEFAULT_FILE_NAME`] inside `dir`
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open(dir.as_ref().join(Self::DEFAULT_FILE_NAME))
    }

    /// Location of the store document
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Ensure the parent directory exists, creating it if necessary
    fn ensure_parent_dir(&self) -> Result<()> {
        let parent = self.parent_dir();
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    fn flush(&self, data: &BTreeMap<String, String>) -> Result<()> {
        self.ensure_parent_dir()?;

        let json = serde_json::to_vec(data)?;
        let mut tmp = NamedTempFile::new_in(self.parent_dir())?;
        tmp.write_all(&json)?;
        tmp.persist(&self.path).map_err(|e| {
            StorageError::storage(format!(
                "Failed to write storage file {}: {}",
                self.path.display(),
                e.error
            ))
        })?;
        Ok(())
    }

    /// Apply `change` to a copy of the records and commit it only once it is on disk
    fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut data = self
            .data
            .write()
            .map_err(|_| StorageError::storage("file storage lock poisoned"))?;
        let mut next = data.clone();
        change(&mut next);
        self.flush(&next)?;
        *data = next;
        Ok(())
    }
}

impl KeyValueStore for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self
            .data
            .read()
            .map_err(|_| StorageError::storage("file storage lock poisoned"))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|data| {
            data.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.mutate(|data| {
            data.remove(key);
        })
    }

    fn clear(&self) -> Result<()> {
        self.mutate(BTreeMap::clear)
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
