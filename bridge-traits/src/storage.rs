//! Key-Value Storage Abstraction
//!
//! Persisted credentials are a handful of opaque strings, so the storage
//! contract is a plain string key-value store. Calls are synchronous: the auth
//! layer reads persisted tokens while it is being constructed and must start
//! in the right state without awaiting anything.

use crate::error::Result;

/// String key-value store used for token persistence.
///
/// Implementations:
/// - Desktop: OS keychain via `keyring` (`secure-store` feature)
/// - Tests and ephemeral sessions: in-memory map
///
/// # Security Requirements
///
/// Implementations MUST never log stored values. Keys are not secret and may
/// appear in logs.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
///
/// fn remember(store: &dyn KeyValueStore, token: &str) -> Result<()> {
///     store.set("app_access_token", token)
/// }
/// ```
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Check if a key exists without keeping its value around
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}
