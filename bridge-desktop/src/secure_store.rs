//! Token Storage using OS Keychain

use bridge_traits::{
    error::{BridgeError, Result},
    storage::KeyValueStore,
};
use keyring::Entry;
use tracing::debug;

/// Keyring-based key-value store
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager (DPAPI)
/// - Linux: Secret Service (libsecret)
///
/// Each key becomes one keychain entry under the configured service name.
pub struct KeyringKeyValueStore {
    service_name: String,
}

impl KeyringKeyValueStore {
    /// Create a new store with default service name
    pub fn new() -> Self {
        Self {
            service_name: "api-client-core".to_string(),
        }
    }

    /// Create a new store with custom service name
    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn get_entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(Self::map_keyring_error)
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        BridgeError::OperationFailed(format!("Keyring error: {}", e))
    }
}

impl Default for KeyringKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for KeyringKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.get_entry(key)?.get_password() {
            Ok(value) => {
                debug!(key = key, "Retrieved value from keyring");
                Ok(Some(value))
            }
            Err(keyring::Error::NoEntry) => {
                debug!(key = key, "Value not found in keyring");
                Ok(None)
            }
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.get_entry(key)?
            .set_password(value)
            .map_err(Self::map_keyring_error)?;

        debug!(key = key, "Stored value in keyring");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.get_entry(key)?.delete_credential() {
            Ok(()) => {
                debug!(key = key, "Deleted value from keyring");
                Ok(())
            }
            // Already gone
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_creation() {
        let store = KeyringKeyValueStore::new();
        assert_eq!(store.service_name, "api-client-core");
    }

    #[test]
    fn test_custom_service_name() {
        let store = KeyringKeyValueStore::with_service_name("test-service");
        assert_eq!(store.service_name, "test-service");
    }

    #[test]
    fn test_set_get_remove() {
        // Keyring may be unavailable on headless systems and CI
        let store = KeyringKeyValueStore::with_service_name("test-api-client-core");
        let key = "test-key-unique-123";

        let _ = store.remove(key);

        match store.set(key, "secret-value") {
            Ok(()) => {
                if let Ok(Some(value)) = store.get(key) {
                    assert_eq!(value, "secret-value");
                }
                store.remove(key).ok();
                assert!(matches!(store.get(key), Ok(None) | Err(_)));
            }
            Err(e) => println!("Keyring not available ({}), skipping test", e),
        }
    }
}
