/*!
Key-value storage backends for persisted state.

This module defines the storage abstraction (port) the binder writes through and
the concrete adapters behind it. Every backend exposes the same shape as browser
`Storage`: string keys, string values, synchronous access.
*/

pub mod local;
pub mod memory;
pub mod noop;

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use local::FileStorage;
pub use memory::MemoryStorage;
pub use noop::NoopStorage;

/// Shared handle to a key-value backend.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Storage abstraction for string records addressed by string keys
///
/// Implementations use `&self` for all methods and rely on interior mutability,
/// so one backend can be shared between several bound containers.
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore: Send + Sync {
    /// Read the record stored under `key`
    ///
    /// # Returns
    /// `Ok(None)` when nothing is stored under the key
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous record
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the record stored under `key`; removing a missing key succeeds
    fn remove(&self, key: &str) -> Result<()>;

    /// Remove every record
    fn clear(&self) -> Result<()>;

    /// Number of stored records, `-1` for stores that hold nothing by construction
    fn length(&self) -> i64;

    /// Name of the key at `index`, in the backend's iteration order
    fn key(&self, index: usize) -> Option<String>;
}

/// Logical storage selector, mirroring browser `localStorage` / `sessionStorage`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageKind {
    /// Survives restarts of the host
    #[serde(alias = "localStorage")]
    Local,
    /// Lives as long as the current session
    #[serde(alias = "sessionStorage")]
    Session,
}

impl StorageKind {
    /// Browser-style name of the store
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "localStorage",
            StorageKind::Session => "sessionStorage",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "localstorage" => Ok(StorageKind::Local),
            "session" | "sessionstorage" => Ok(StorageKind::Session),
            other => Err(StorageError::storage(format!(
                "unknown storage kind '{other}'"
            ))),
        }
    }
}
