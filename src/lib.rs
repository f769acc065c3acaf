//! Workspace entry crate.
//!
//! This crate exposes shared feature flags that map to the individual
//! workspace crates and re-exports the service façade, so host applications
//! can depend on `api-workspace` without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
