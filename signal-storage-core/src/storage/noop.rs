/*!
Inert storage used where no real backend exists (server-side rendering).
*/

use super::KeyValueStore;
use crate::Result;

/// Key-value store that accepts every write and never returns data
///
/// Callers can write through it unconditionally, so code bound to a
/// `NoopStorage` behaves exactly like code bound to a real backend minus
/// the persistence.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStorage;

impl NoopStorage {
    pub fn new() -> Self {
        Self
    }
}

impl KeyValueStore for NoopStorage {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn length(&self) -> i64 {
        -1
    }

    fn key(&self, _index: usize) -> Option<String> {
        None
    }
}
