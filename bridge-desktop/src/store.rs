//! In-memory key-value store

use bridge_traits::{error::Result, storage::KeyValueStore};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Process-lifetime token storage
///
/// Values live as long as the store does. This is the default when the
/// `secure-store` feature is off, and the store of choice for tests.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryKeyValueStore::new();
        assert!(store.is_empty());

        store.set("app_access_token", "abc").unwrap();
        assert_eq!(store.get("app_access_token").unwrap(), Some("abc".to_string()));
        assert_eq!(store.len(), 1);

        store.set("app_access_token", "def").unwrap();
        assert_eq!(store.get("app_access_token").unwrap(), Some("def".to_string()));

        store.remove("app_access_token").unwrap();
        assert_eq!(store.get("app_access_token").unwrap(), None);
        store.remove("app_access_token").unwrap();
    }
}
