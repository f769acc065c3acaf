//! Request descriptors and per-call options

use core_runtime::config::{CachePolicy, RetryPolicy};
use core_runtime::logging::redact_headers;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

pub use bridge_traits::http::HttpMethod as Method;

/// Query parameter value.
///
/// `Null` parameters are dropped from both the URL and the cache key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl QueryValue {
    pub fn is_null(&self) -> bool {
        matches!(self, QueryValue::Null)
    }

    /// Rendering used in the URL query string.
    pub fn to_query_string(&self) -> Option<String> {
        match self {
            QueryValue::String(s) => Some(s.clone()),
            QueryValue::Integer(i) => Some(i.to_string()),
            QueryValue::Float(f) => Some(f.to_string()),
            QueryValue::Bool(b) => Some(b.to_string()),
            QueryValue::Null => None,
        }
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::String(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::String(value)
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        QueryValue::Integer(value)
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        QueryValue::Integer(value.into())
    }
}

impl From<u32> for QueryValue {
    fn from(value: u32) -> Self {
        QueryValue::Integer(value.into())
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        QueryValue::Float(value)
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        QueryValue::Bool(value)
    }
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(QueryValue::Null, Into::into)
    }
}

/// Per-call override of a client-wide policy.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PolicyOverride<P> {
    /// Use the client default.
    #[default]
    Inherit,
    /// Turn the mechanism off for this call.
    Disabled,
    /// Use this policy for this call.
    Custom(P),
}

impl<P> PolicyOverride<P> {
    /// The policy in effect given the client-wide `default`.
    pub fn resolve(self, default: Option<P>) -> Option<P> {
        match self {
            PolicyOverride::Inherit => default,
            PolicyOverride::Disabled => None,
            PolicyOverride::Custom(policy) => Some(policy),
        }
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Text(String),
}

/// Free-form per-request data carried through the interceptor chains.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    /// Set by the default request stage.
    pub started_at: Option<Instant>,
    pub extra: HashMap<String, Value>,
}

impl PartialEq for RequestMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.extra == other.extra
    }
}

/// Per-call options.
///
/// ```ignore
/// let options = RequestOptions::new()
///     .param("page", 2)
///     .param("filter", None::<String>)
///     .timeout(Duration::from_secs(5))
///     .no_retry();
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub params: BTreeMap<String, QueryValue>,
    pub headers: HashMap<String, String>,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
    pub retry: PolicyOverride<RetryPolicy>,
    pub cache: PolicyOverride<CachePolicy>,
    pub request_id: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = PolicyOverride::Custom(policy);
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.retry = PolicyOverride::Disabled;
        self
    }

    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = PolicyOverride::Custom(policy);
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cache = PolicyOverride::Disabled;
        self
    }

    /// Uses a caller-chosen correlation id instead of a generated one.
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A request with its effective policies resolved.
///
/// Request-phase interceptors receive and return this value.
#[derive(Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub params: BTreeMap<String, QueryValue>,
    pub headers: HashMap<String, String>,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub cache: Option<CachePolicy>,
    pub request_id: Option<String>,
    pub metadata: RequestMetadata,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: BTreeMap::new(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
            retry: None,
            cache: None,
            request_id: None,
            metadata: RequestMetadata::default(),
        }
    }

    /// Parameters that end up in the URL, in key order.
    pub fn query_pairs(&self) -> impl Iterator<Item = (&str, String)> {
        self.params
            .iter()
            .filter_map(|(key, value)| value.to_query_string().map(|v| (key.as_str(), v)))
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("headers", &redact_headers(&self.headers))
            .field("has_body", &self.body.is_some())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("cache", &self.cache)
            .field("request_id", &self.request_id)
            .finish()
    }
}
