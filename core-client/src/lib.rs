//! # Request Client
//!
//! Generic HTTP client core: issues requests against a backend and applies
//! authentication, retry, caching, cancellation and timeouts uniformly.
//!
//! ## Modules
//!
//! - [`client`]: the [`ApiClient`] orchestrator
//! - [`error`]: the [`ApiError`] taxonomy every failure is reported in
//! - [`cache`]: TTL cache with insertion-ordered eviction
//! - [`interceptor`]: request and response interceptor chains
//! - [`registry`]: cancellation tokens for in-flight requests
//! - [`request`] / [`response`]: descriptors, per-call options and envelopes

pub mod cache;
pub mod client;
pub mod error;
pub mod interceptor;
pub mod registry;
pub mod request;
pub mod response;
mod retry;

pub use cache::{CacheKey, TtlCache};
pub use client::{ApiClient, WeakApiClient, CORRELATION_HEADER};
pub use error::{ApiError, ErrorKind, Failure, Result, REQUEST_ID_HEADER};
pub use interceptor::{InterceptorChain, InterceptorId, Interceptors};
pub use registry::{InFlight, InFlightRegistry};
pub use request::{
    Method, PolicyOverride, QueryValue, RequestBody, RequestDescriptor, RequestMetadata,
    RequestOptions,
};
pub use response::{Envelope, ResponseBody};
