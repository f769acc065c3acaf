//! # Client Configuration Module
//!
//! Provides construction-time configuration for the API client core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `ClientConfig`
//! instance that holds every injected capability and policy default. It
//! enforces fail-fast validation so a misconfigured client never reaches the
//! network.
//!
//! ## Required Settings
//!
//! - `base_url` - Absolute `http`/`https` URL every request path is appended to
//!
//! ## Capabilities (with platform defaults)
//!
//! - `HttpClient` - Network transport (desktop default: reqwest)
//! - `KeyValueStore` - Token persistence (desktop default: in-memory, or the
//!   OS keychain with the `secure-store` feature)
//! - `EnvironmentChannel` - Host-wide signals (default: broadcast channel on
//!   desktop, no-op elsewhere)
//! - `Clock` - Time source (default: system clock)
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults are
//! injected automatically if not provided.
//!
//! ## Policy Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | timeout | 30 s |
//! | retry   | enabled, 3 attempts, 1 s delay, 10 s cap, exponential |
//! | cache   | disabled, 5 min TTL, 100 entries |
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{ClientConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .base_url("https://api.example.com/v1")
//!     .timeout(Duration::from_secs(10))
//!     .retry(RetryPolicy::default().with_max_attempts(5))
//!     .enable_cache(true)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::ClientConfig;
//!
//! // Panics with an actionable error message: no base URL
//! let config = ClientConfig::builder()
//!     .build()
//!     .expect("Should fail - missing base URL");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, EnvironmentChannel, HttpClient, KeyValueStore, SystemClock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::events::DEFAULT_EVENT_BUFFER_SIZE;

/// Environment variable holding the backend base URL.
pub const ENV_BASE_URL: &str = "API_BASE_URL";

/// Environment variable holding the default timeout in milliseconds.
pub const ENV_TIMEOUT_MS: &str = "API_TIMEOUT_MS";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STORAGE_PREFIX: &str = "app_";

// ============================================================================
// Retry Policy
// ============================================================================

/// Growth rule for the delay between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Delay doubles after every failed attempt.
    #[default]
    Exponential,
    /// Delay grows by the base delay after every failed attempt.
    Linear,
}

/// Retry configuration for the network step of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay to wait after `failed_attempts` attempts have failed (1-based).
    ///
    /// Exponential: `delay * 2^(n-1)`. Linear: `delay * n`. Both capped at
    /// `max_delay`.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let n = failed_attempts.max(1);
        let raw = match self.backoff {
            Backoff::Exponential => {
                let factor = 2u32.checked_pow(n - 1).unwrap_or(u32::MAX);
                self.delay.checked_mul(factor)
            }
            Backoff::Linear => self.delay.checked_mul(n),
        };
        raw.unwrap_or(self.max_delay).min(self.max_delay)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Retry max_attempts must be at least 1".to_string(),
            ));
        }

        if self.max_delay < self.delay {
            return Err(Error::Config(format!(
                "Retry max_delay ({:?}) must not be smaller than delay ({:?})",
                self.max_delay, self.delay
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Cache Policy
// ============================================================================

/// Per-request cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub ttl: Duration,
}

impl CachePolicy {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Client-wide response cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether GET responses are cached unless a request opts in or out.
    pub enabled: bool,
    pub ttl: Duration,
    pub max_size: usize,
    /// Drop cached entries for a path after a successful mutation on it.
    pub invalidate_on_mutation: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(5 * 60),
            max_size: 100,
            invalidate_on_mutation: false,
        }
    }
}

impl CacheConfig {
    /// The policy applied to requests that do not override caching.
    pub fn default_policy(&self) -> Option<CachePolicy> {
        self.enabled.then_some(CachePolicy { ttl: self.ttl })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::Config(
                "Cache max_size must be greater than 0".to_string(),
            ));
        }

        if self.enabled && self.ttl.is_zero() {
            return Err(Error::Config(
                "Cache TTL must be greater than 0 when caching is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Client Configuration
// ============================================================================

/// Resolved configuration handed to the client at construction.
#[derive(Clone)]
pub struct ClientConfig {
    /// Absolute base URL; request paths are appended to it.
    pub base_url: Url,

    /// Headers sent with every request. Per-request headers win on conflict.
    pub default_headers: HashMap<String, String>,

    /// Overall deadline per request, spanning all retry attempts. `None` disables it.
    pub timeout: Option<Duration>,

    /// Default retry policy. `None` disables retries.
    pub retry: Option<RetryPolicy>,

    pub cache: CacheConfig,

    /// Namespace for persisted token keys.
    pub storage_prefix: String,

    /// Buffer size for the event bus broadcast mirror.
    pub event_buffer_size: usize,

    pub http_client: Arc<dyn HttpClient>,

    pub key_value_store: Arc<dyn KeyValueStore>,

    pub environment_channel: Arc<dyn EnvironmentChannel>,

    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_str())
            .field(
                "default_headers",
                &self.default_headers.keys().collect::<Vec<_>>(),
            )
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("cache", &self.cache)
            .field("storage_prefix", &self.storage_prefix)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("http_client", &"HttpClient { ... }")
            .field("key_value_store", &"KeyValueStore { ... }")
            .field("environment_channel", &"EnvironmentChannel { ... }")
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Validates the policy settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Base URL must use http or https, got '{}'",
                self.base_url.scheme()
            )));
        }

        if let Some(retry) = &self.retry {
            retry.validate()?;
        }

        self.cache.validate()?;

        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config(
                "Timeout must be greater than 0; use None to disable it".to_string(),
            ));
        }

        if self.storage_prefix.is_empty() {
            return Err(Error::Config(
                "Storage prefix cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Capability defaults
// ============================================================================

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Other hosts: inject a native transport."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_key_value_store() -> Result<Arc<dyn KeyValueStore>> {
    Err(Error::CapabilityMissing {
        capability: "KeyValueStore".to_string(),
        message: "KeyValueStore implementation is required for token persistence. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default store. \
                 Other hosts: inject platform storage."
            .to_string(),
    })
}

#[cfg(all(feature = "desktop-shims", not(feature = "secure-store")))]
fn provide_default_key_value_store() -> Result<Arc<dyn KeyValueStore>> {
    use bridge_desktop::MemoryKeyValueStore;

    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
    Ok(store)
}

#[cfg(all(feature = "desktop-shims", feature = "secure-store"))]
fn provide_default_key_value_store() -> Result<Arc<dyn KeyValueStore>> {
    use bridge_desktop::KeyringKeyValueStore;

    let store: Arc<dyn KeyValueStore> = Arc::new(KeyringKeyValueStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_environment_channel() -> Arc<dyn EnvironmentChannel> {
    Arc::new(bridge_traits::NoopEnvironmentChannel)
}

#[cfg(feature = "desktop-shims")]
fn provide_default_environment_channel() -> Arc<dyn EnvironmentChannel> {
    Arc::new(bridge_desktop::BroadcastEnvironmentChannel::default())
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    default_headers: HashMap<String, String>,
    timeout: Option<Option<Duration>>,
    retry: Option<Option<RetryPolicy>>,
    cache: CacheConfig,
    storage_prefix: Option<String>,
    event_buffer_size: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    key_value_store: Option<Arc<dyn KeyValueStore>>,
    environment_channel: Option<Arc<dyn EnvironmentChannel>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ClientConfigBuilder {
    /// Seeds a builder from `API_BASE_URL` and `API_TIMEOUT_MS`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `API_TIMEOUT_MS` is not an integer.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::default();

        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            builder = builder.base_url(base_url.trim());
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{} must be a whole number of milliseconds, got '{}'",
                    ENV_TIMEOUT_MS, raw
                ))
            })?;
            builder = builder.timeout(Duration::from_millis(millis));
        }

        Ok(builder)
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn default_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(key.into(), value.into());
        self
    }

    pub fn default_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.default_headers.extend(headers);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Some(timeout));
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = Some(None);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(Some(policy));
        self
    }

    pub fn disable_retry(mut self) -> Self {
        self.retry = Some(None);
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn enable_cache(mut self, enabled: bool) -> Self {
        self.cache.enabled = enabled;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl = ttl;
        self
    }

    pub fn cache_max_size(mut self, max_size: usize) -> Self {
        self.cache.max_size = max_size;
        self
    }

    pub fn invalidate_cache_on_mutation(mut self, enabled: bool) -> Self {
        self.cache.invalidate_on_mutation = enabled;
        self
    }

    pub fn storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = Some(prefix.into());
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn key_value_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.key_value_store = Some(store);
        self
    }

    pub fn environment_channel(mut self, channel: Arc<dyn EnvironmentChannel>) -> Self {
        self.environment_channel = Some(channel);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Resolves defaults and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the base URL is missing or invalid, or a policy is invalid
    /// - [`Error::CapabilityMissing`] when a required capability has no default
    pub fn build(self) -> Result<ClientConfig> {
        let raw_base_url = self
            .base_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                Error::Config("Base URL is required. Use .base_url() to set it.".to_string())
            })?;

        let base_url = Url::parse(raw_base_url.trim()).map_err(|e| {
            Error::Config(format!("Invalid base URL '{}': {}", raw_base_url, e))
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let key_value_store = match self.key_value_store {
            Some(store) => store,
            None => provide_default_key_value_store()?,
        };

        let config = ClientConfig {
            base_url,
            default_headers: self.default_headers,
            timeout: self.timeout.unwrap_or(Some(DEFAULT_TIMEOUT)),
            retry: self.retry.unwrap_or(Some(RetryPolicy::default())),
            cache: self.cache,
            storage_prefix: self
                .storage_prefix
                .unwrap_or_else(|| DEFAULT_STORAGE_PREFIX.to_string()),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            http_client,
            key_value_store,
            environment_channel: self
                .environment_channel
                .unwrap_or_else(provide_default_environment_channel),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
