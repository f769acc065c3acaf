//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the bridge traits
//! using desktop-appropriate libraries:
//! - `HttpClient` using `reqwest`
//! - `KeyValueStore` in memory, or in the OS keychain via `keyring`
//! - `EnvironmentChannel` using a Tokio broadcast channel
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{BroadcastEnvironmentChannel, MemoryKeyValueStore, ReqwestHttpClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let store = MemoryKeyValueStore::new();
//!     let channel = BroadcastEnvironmentChannel::default();
//!     let mut signals = channel.subscribe();
//!
//!     // Use in core configuration
//! }
//! ```

mod http;
mod signal;
mod store;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use http::ReqwestHttpClient;
pub use signal::BroadcastEnvironmentChannel;
pub use store::MemoryKeyValueStore;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringKeyValueStore;
