//! Token Persistence
//!
//! Persists the two opaque token strings through the injected
//! [`KeyValueStore`], namespaced by a configurable prefix:
//!
//! | Key | Value |
//! |-----|-------|
//! | `{prefix}access_token` | access token |
//! | `{prefix}refresh_token` | refresh token, absent when none was issued |
//!
//! ## Security Features
//!
//! - Token values are never logged or exposed in error messages
//! - Keys are logged, values never are
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{AuthToken, TokenStore};
//! use std::sync::Arc;
//! # use bridge_traits::storage::KeyValueStore;
//! # fn example(store: Arc<dyn KeyValueStore>) -> core_auth::Result<()> {
//! let token_store = TokenStore::new(store, "app_");
//!
//! token_store.save(&AuthToken::new("access").with_refresh_token("refresh"))?;
//! let restored = token_store.load()?;
//! token_store.clear()?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::AuthToken;
use bridge_traits::storage::KeyValueStore;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ACCESS_TOKEN_KEY: &str = "access_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Persistent token storage.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl TokenStore {
    /// Creates a new token store.
    ///
    /// # Arguments
    ///
    /// * `store` - Key-value storage capability
    /// * `prefix` - Namespace prepended to every key
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        debug!(prefix = %prefix, "Initializing TokenStore");
        Self { store, prefix }
    }

    pub fn access_token_key(&self) -> String {
        format!("{}{}", self.prefix, ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token_key(&self) -> String {
        format!("{}{}", self.prefix, REFRESH_TOKEN_KEY)
    }

    /// Persists both token parts.
    ///
    /// A token without a refresh part removes any previously stored one.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the underlying store rejects a write.
    pub fn save(&self, token: &AuthToken) -> Result<()> {
        self.store
            .set(&self.access_token_key(), &token.access_token)
            .map_err(|e| {
                warn!(key = %self.access_token_key(), error = %e, "Failed to persist access token");
                AuthError::from(e)
            })?;

        let refresh_key = self.refresh_token_key();
        let refresh_result = match &token.refresh_token {
            Some(refresh) => self.store.set(&refresh_key, refresh),
            None => self.store.remove(&refresh_key),
        };
        refresh_result.map_err(|e| {
            warn!(key = %refresh_key, error = %e, "Failed to persist refresh token");
            AuthError::from(e)
        })?;

        info!(
            has_refresh_token = token.refresh_token.is_some(),
            "Tokens persisted"
        );
        Ok(())
    }

    /// Loads a previously persisted token.
    ///
    /// Returns `Ok(None)` when no access token is stored. An orphaned refresh
    /// token without an access token is ignored.
    pub fn load(&self) -> Result<Option<AuthToken>> {
        let Some(access) = self.store.get(&self.access_token_key())? else {
            debug!("No persisted access token");
            return Ok(None);
        };

        let refresh = self.store.get(&self.refresh_token_key())?;

        info!(
            has_refresh_token = refresh.is_some(),
            "Restored persisted tokens"
        );

        Ok(Some(AuthToken {
            access_token: access,
            refresh_token: refresh,
            expires_at: None,
            token_type: None,
        }))
    }

    /// Removes both persisted token parts.
    pub fn clear(&self) -> Result<()> {
        let access = self.store.remove(&self.access_token_key());
        let refresh = self.store.remove(&self.refresh_token_key());

        access.and(refresh).map_err(|e| {
            warn!(error = %e, "Failed to remove persisted tokens");
            AuthError::from(e)
        })?;

        info!("Persisted tokens removed");
        Ok(())
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}
