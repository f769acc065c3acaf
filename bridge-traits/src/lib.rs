//! # Host Bridge Traits
//!
//! Capability contracts the request client core depends on.
//!
//! ## Overview
//!
//! The core never reaches for ambient globals. Everything that differs
//! between hosts (how bytes go over the wire, where credentials are kept,
//! how a forced logout is announced) is injected once at construction
//! through one of the traits below, so tests substitute doubles without
//! patching anything.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Single round-trip HTTP transport
//!
//! ### Storage
//! - [`KeyValueStore`](storage::KeyValueStore) - String persistence for tokens
//!
//! ### Host Integration
//! - [`EnvironmentChannel`](signal::EnvironmentChannel) - Global signals such as forced logout
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core should fail fast with descriptive errors when a required capability is missing:
//!
//! ```ignore
//! use core_runtime::Error;
//!
//! let http_client = config.http_client.ok_or_else(|| Error::CapabilityMissing {
//!     capability: "HttpClient".to_string(),
//!     message: "No HTTP client implementation provided. \
//!               Desktop: enable the desktop-shims feature. \
//!               Other hosts: inject a native adapter.".to_string(),
//! })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Report connection-level failures as `BridgeError::Network`
//! - Provide actionable error messages
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks. Implementations must ensure thread safety.
//!
//! ## Examples
//!
//! ### Implementing HttpClient
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         // Implementation
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod signal;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use signal::{EnvironmentChannel, HostSignal, NoopEnvironmentChannel};
pub use storage::KeyValueStore;
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, SystemClock};
