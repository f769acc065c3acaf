//! # Request Client
//!
//! [`ApiClient`] issues requests against one backend and applies the
//! cross-cutting policies configured in [`ClientConfig`].
//!
//! ## Request lifecycle
//!
//! 1. Resolve the effective retry and cache policy (per-call override, then client default)
//! 2. Serve cacheable `GET`s from the cache when possible
//! 3. Run the request interceptors (correlation id, timing, auth header)
//! 4. Build the URL from the base URL, path and non-null query parameters
//! 5. Register a cancellation token for the correlation id
//! 6. Execute under the retry policy, bounded by the request timeout
//! 7. Run the response interceptors and populate the cache
//!
//! A request ends exactly one way: it completes, it is cancelled by the
//! caller, or its timeout fires. The last two produce
//! [`ErrorKind::Cancelled`] and [`ErrorKind::Timeout`] respectively.
//!
//! ## Usage
//!
//! ```ignore
//! use core_client::{ApiClient, RequestOptions};
//!
//! let client = ApiClient::new(config)?;
//! let rooms: Envelope<Vec<Room>> = client
//!     .get("/rooms", RequestOptions::new().param("page", 1))
//!     .await?;
//! ```

use crate::cache::{CacheKey, TtlCache};
use crate::error::{ApiError, ErrorKind, Result};
use crate::interceptor::Interceptors;
use crate::registry::InFlightRegistry;
use crate::request::{Method, RequestBody, RequestDescriptor, RequestMetadata, RequestOptions};
use crate::response::{Envelope, ResponseBody};
use crate::retry::run_with_retry;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bytes::Bytes;
use core_auth::AuthManager;
use core_runtime::config::{CacheConfig, ClientConfig, RetryPolicy};
use core_runtime::events::{CoreEvent, EventBus, RequestEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

/// Header carrying the correlation id on outgoing requests.
pub const CORRELATION_HEADER: &str = "X-Request-ID";

/// HTTP client for one backend.
///
/// Cheap to clone; clones share the cache, the in-flight registry, the
/// interceptors and the auth state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: Url,
    default_headers: HashMap<String, String>,
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    cache_config: CacheConfig,
    http: Arc<dyn HttpClient>,
    auth: AuthManager,
    events: EventBus,
    cache: TtlCache<CacheKey, Envelope<ResponseBody>>,
    registry: InFlightRegistry,
    interceptors: Interceptors,
}

type RawResponse = (HttpResponse, ResponseBody);

impl ApiClient {
    /// Creates a client with its own event bus and auth manager.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` fails validation.
    pub fn new(config: ClientConfig) -> core_runtime::Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.event_buffer_size);
        let auth = AuthManager::from_config(&config, events.clone());
        Ok(Self::with_auth(config, events, auth))
    }

    /// Creates a client sharing an existing event bus and auth manager.
    pub fn with_auth(config: ClientConfig, events: EventBus, auth: AuthManager) -> Self {
        let interceptors = Interceptors::default();
        install_default_stages(&interceptors, auth.clone());

        info!(
            base_url = %config.base_url,
            timeout_ms = config.timeout.map(|t| t.as_millis() as u64),
            retry = config.retry.is_some(),
            cache = config.cache.enabled,
            "API client created"
        );

        Self {
            inner: Arc::new(ClientInner {
                base_url: config.base_url,
                default_headers: config.default_headers,
                timeout: config.timeout,
                retry: config.retry,
                cache: TtlCache::new(config.cache.max_size),
                cache_config: config.cache,
                http: config.http_client,
                auth,
                events,
                registry: InFlightRegistry::new(),
                interceptors,
            }),
        }
    }

    /// Issues a request and decodes the body into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Envelope<T>> {
        self.request_raw(method, path, options).await?.decode()
    }

    /// Issues a request and returns the parsed but untyped body.
    #[instrument(skip(self, options))]
    pub async fn request_raw(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Envelope<ResponseBody>> {
        let inner = &self.inner;
        let descriptor = inner.describe(method, path, options);

        let cache_slot = match (method, descriptor.cache) {
            (Method::Get, Some(policy)) => {
                Some((CacheKey::new(method, path, &descriptor.params), policy.ttl))
            }
            _ => None,
        };

        if let Some((key, _)) = &cache_slot {
            if let Some(mut hit) = inner.cache.get(key) {
                let mut request = descriptor;
                let request_id = request
                    .request_id
                    .get_or_insert_with(new_request_id)
                    .clone();
                debug!(key = %key, request_id = %request_id, "Serving response from cache");
                hit.request = request;
                hit.cached = true;
                hit.duration = None;
                inner.emit_completed(&hit);
                return Ok(hit);
            }
        }

        let outcome = inner.dispatch(descriptor).await;

        match &outcome {
            Ok(envelope) => {
                if let Some((key, ttl)) = cache_slot {
                    inner.cache.set(key, envelope.clone(), ttl);
                }
                if method != Method::Get && inner.cache_config.invalidate_on_mutation {
                    let removed = inner
                        .cache
                        .remove_where(|key| key.path() == path);
                    if removed > 0 {
                        debug!(path, removed, "Invalidated cached responses after mutation");
                    }
                }
                inner.emit_completed(envelope);
            }
            Err(error) => {
                if error.kind == ErrorKind::Unauthorized {
                    inner.auth.handle_unauthorized();
                }
                inner.events.emit(CoreEvent::Request(RequestEvent::Failed {
                    request_id: error.request_id.clone().unwrap_or_default(),
                    method: method.as_str().to_string(),
                    path: path.to_string(),
                    kind: error.kind.as_str().to_string(),
                    status: error.status,
                }));
            }
        }

        outcome
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Envelope<T>> {
        self.request(Method::Get, path, options).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B, options: RequestOptions) -> Result<Envelope<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let options = with_json_body(options, body)?;
        self.request(Method::Post, path, options).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B, options: RequestOptions) -> Result<Envelope<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let options = with_json_body(options, body)?;
        self.request(Method::Put, path, options).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B, options: RequestOptions) -> Result<Envelope<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let options = with_json_body(options, body)?;
        self.request(Method::Patch, path, options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Envelope<T>> {
        self.request(Method::Delete, path, options).await
    }

    /// Cancels the request with `request_id`. Returns `false` if it is not in flight.
    pub fn cancel_request(&self, request_id: &str) -> bool {
        self.inner.registry.cancel(request_id)
    }

    /// Cancels every in-flight request.
    pub fn cancel_all(&self) -> usize {
        self.inner.registry.cancel_all()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cache_size(&self) -> usize {
        self.inner.cache.len()
    }

    /// Removes cached responses whose path starts with `path_prefix`.
    pub fn invalidate_cache(&self, path_prefix: &str) -> usize {
        self.inner
            .cache
            .remove_where(|key| key.path().starts_with(path_prefix))
    }

    pub fn interceptors(&self) -> &Interceptors {
        &self.inner.interceptors
    }

    pub fn auth(&self) -> &AuthManager {
        &self.inner.auth
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// A handle that does not keep the client alive.
    pub fn downgrade(&self) -> WeakApiClient {
        WeakApiClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Cancels every in-flight request and empties the cache.
    pub fn destroy(&self) {
        let cancelled = self.cancel_all();
        self.clear_cache();
        info!(cancelled, "API client destroyed");
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("timeout", &self.inner.timeout)
            .field("retry", &self.inner.retry)
            .field("cache", &self.inner.cache)
            .field("in_flight", &self.inner.registry.len())
            .finish()
    }
}

/// Non-owning handle to an [`ApiClient`], for listeners that outlive it.
#[derive(Clone, Debug)]
pub struct WeakApiClient {
    inner: Weak<ClientInner>,
}

impl WeakApiClient {
    pub fn upgrade(&self) -> Option<ApiClient> {
        self.inner.upgrade().map(|inner| ApiClient { inner })
    }
}

impl ClientInner {
    fn describe(&self, method: Method, path: &str, options: RequestOptions) -> RequestDescriptor {
        let mut headers = self.default_headers.clone();
        headers.extend(options.headers);

        RequestDescriptor {
            method,
            path: path.to_string(),
            params: options.params,
            headers,
            body: options.body,
            timeout: options.timeout.or(self.timeout),
            retry: options.retry.resolve(self.retry),
            cache: options.cache.resolve(self.cache_config.default_policy()),
            request_id: options.request_id,
            metadata: RequestMetadata {
                started_at: None,
                extra: options.metadata,
            },
        }
    }

    async fn dispatch(&self, descriptor: RequestDescriptor) -> Result<Envelope<ResponseBody>> {
        let preset_id = descriptor.request_id.clone();
        let mut request = self
            .interceptors
            .request
            .execute(Ok(descriptor))
            .await
            .map_err(|e| match &preset_id {
                Some(id) => e.with_request_id(id),
                None => e,
            })?;

        let request_id = request
            .request_id
            .get_or_insert_with(new_request_id)
            .clone();

        let http_request = self
            .build_http_request(&request)
            .map_err(|e| e.with_request_id(&request_id))?;

        let flight = self.registry.register(&request_id);
        debug!(request_id = %request_id, url = %http_request.url, "Sending request");

        let attempts = run_with_retry(request.retry.as_ref(), &request_id, &self.events, |_| {
            send_once(Arc::clone(&self.http), http_request.clone())
        });

        let outcome = tokio::select! {
            biased;
            _ = flight.token().cancelled() => {
                debug!(request_id = %request_id, "Request cancelled");
                Err(ApiError::cancelled())
            }
            after = deadline(request.timeout) => {
                warn!(request_id = %request_id, timeout_ms = after.as_millis() as u64, "Request timed out");
                Err(ApiError::timeout(after))
            }
            result = attempts => result,
        };
        drop(flight);

        let (response, body) = outcome.map_err(|e| e.with_request_id(&request_id))?;

        let envelope = Envelope {
            data: body,
            status: response.status,
            status_text: response.status_text,
            headers: response.headers,
            request,
            cached: false,
            duration: None,
        };

        self.interceptors
            .response
            .execute(Ok(envelope))
            .await
            .map_err(|e| e.with_request_id(&request_id))
    }

    fn build_http_request(&self, request: &RequestDescriptor) -> Result<HttpRequest> {
        let url = self.build_url(request)?;
        let mut http_request = HttpRequest::new(request.method, url.as_str());
        http_request.headers = request.headers.clone();

        match &request.body {
            Some(RequestBody::Json(value)) => {
                http_request = http_request.json(value).map_err(ApiError::classify)?;
            }
            Some(RequestBody::Text(text)) => {
                if !has_header(&http_request.headers, "content-type") {
                    http_request
                        .headers
                        .insert("Content-Type".to_string(), "text/plain; charset=utf-8".to_string());
                }
                http_request.body = Some(Bytes::from(text.clone()));
            }
            None => {}
        }

        Ok(http_request)
    }

    fn build_url(&self, request: &RequestDescriptor) -> Result<Url> {
        let path = request.path.as_str();
        let parsed = if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path)
        } else {
            let base = self.base_url.as_str().trim_end_matches('/');
            Url::parse(&format!("{}/{}", base, path.trim_start_matches('/')))
        };

        let mut url = parsed.map_err(|e| {
            ApiError::new(
                ErrorKind::Unknown,
                format!("Invalid request URL for '{}': {}", path, e),
            )
        })?;

        let mut pairs = request.query_pairs().peekable();
        if pairs.peek().is_some() {
            url.query_pairs_mut().extend_pairs(pairs);
        }

        Ok(url)
    }

    fn emit_completed(&self, envelope: &Envelope<ResponseBody>) {
        self.events.emit(CoreEvent::Request(RequestEvent::Completed {
            request_id: envelope.request.request_id.clone().unwrap_or_default(),
            method: envelope.request.method.as_str().to_string(),
            path: envelope.request.path.clone(),
            status: envelope.status,
            duration_ms: envelope
                .duration
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            cached: envelope.cached,
        }));
    }
}

async fn send_once(http: Arc<dyn HttpClient>, request: HttpRequest) -> Result<RawResponse> {
    let response = http.execute(request).await.map_err(ApiError::classify)?;

    let parsed = ResponseBody::parse(
        response.status,
        response.header("content-type"),
        response.body.clone(),
    );

    if !response.is_success() {
        let body = parsed.unwrap_or_else(|_| {
            ResponseBody::Text(String::from_utf8_lossy(&response.body).into_owned())
        });
        return Err(ApiError::from_response(
            response.status,
            &response.status_text,
            &body,
            &response.headers,
        ));
    }

    let body = parsed.map_err(ApiError::classify)?;
    Ok((response, body))
}

async fn deadline(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(after) => {
            tokio::time::sleep(after).await;
            after
        }
        None => std::future::pending().await,
    }
}

fn with_json_body<B: Serialize + ?Sized>(options: RequestOptions, body: &B) -> Result<RequestOptions> {
    let value = serde_json::to_value(body).map_err(|e| {
        ApiError::new(
            ErrorKind::Unknown,
            format!("Failed to serialize request body: {}", e),
        )
    })?;
    Ok(options.json(value))
}

fn has_header(headers: &HashMap<String, String>, name: &str) -> bool {
    headers.keys().any(|key| key.eq_ignore_ascii_case(name))
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn install_default_stages(interceptors: &Interceptors, auth: AuthManager) {
    interceptors
        .request
        .on_fulfilled(move |mut request: RequestDescriptor| {
            let auth = auth.clone();
            async move {
                let request_id = request
                    .request_id
                    .get_or_insert_with(new_request_id)
                    .clone();
                request.metadata.started_at = Some(Instant::now());
                request
                    .headers
                    .insert(CORRELATION_HEADER.to_string(), request_id);

                for (name, value) in auth.auth_header() {
                    if !has_header(&request.headers, &name) {
                        request.headers.insert(name, value);
                    }
                }
                Ok(request)
            }
        });

    interceptors
        .response
        .on_fulfilled(|mut envelope: Envelope<ResponseBody>| async move {
            if let Some(started_at) = envelope.request.metadata.started_at {
                envelope.duration = Some(started_at.elapsed());
            }
            debug!(
                request_id = envelope.request.request_id.as_deref().unwrap_or_default(),
                status = envelope.status,
                duration_ms = envelope.duration.map(|d| d.as_millis() as u64),
                "Request completed"
            );
            Ok(envelope)
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::BridgeError;
    use bridge_desktop::MemoryKeyValueStore;
    use core_auth::AuthToken;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHttpClient {
        requests: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpClient for RecordingHttpClient {
        async fn execute(&self, request: HttpRequest) -> bridge_traits::error::Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(HttpResponse {
                status: 200,
                status_text: "OK".to_string(),
                headers: HashMap::from([(
                    "content-type".to_string(),
                    "application/json".to_string(),
                )]),
                body: Bytes::from_static(br#"{"ok":true}"#),
            })
        }
    }

    struct FailingHttpClient;

    #[async_trait]
    impl HttpClient for FailingHttpClient {
        async fn execute(&self, _request: HttpRequest) -> bridge_traits::error::Result<HttpResponse> {
            Err(BridgeError::Network("connection refused".to_string()))
        }
    }

    fn client_with(http: Arc<dyn HttpClient>) -> ApiClient {
        let config = ClientConfig::builder()
            .base_url("https://api.example.com/v1/")
            .default_header("Accept", "application/json")
            .http_client(http)
            .key_value_store(Arc::new(MemoryKeyValueStore::new()))
            .disable_retry()
            .build()
            .unwrap();
        ApiClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_builds_url_and_headers() {
        let http = Arc::new(RecordingHttpClient::default());
        let client = client_with(http.clone());
        client.auth().set_token(AuthToken::new("secret"));

        let envelope = client
            .request_raw(
                Method::Get,
                "/rooms",
                RequestOptions::new()
                    .param("page", 2)
                    .param("q", "a b")
                    .param("missing", None::<String>)
                    .request_id("req-7"),
            )
            .await
            .unwrap();

        let sent = http.requests.lock().unwrap()[0].clone();
        assert_eq!(sent.url, "https://api.example.com/v1/rooms?page=2&q=a+b");
        assert_eq!(sent.headers.get("Authorization").unwrap(), "Bearer secret");
        assert_eq!(sent.headers.get(CORRELATION_HEADER).unwrap(), "req-7");
        assert_eq!(sent.headers.get("Accept").unwrap(), "application/json");

        assert_eq!(envelope.request.request_id.as_deref(), Some("req-7"));
        assert!(envelope.duration.is_some());
        assert!(!envelope.cached);
        assert_eq!(client.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_per_call_header_wins_over_auth() {
        let http = Arc::new(RecordingHttpClient::default());
        let client = client_with(http.clone());
        client.auth().set_token(AuthToken::new("secret"));

        client
            .request_raw(
                Method::Get,
                "health",
                RequestOptions::new().header("authorization", "Basic abc"),
            )
            .await
            .unwrap();

        let sent = http.requests.lock().unwrap()[0].clone();
        assert_eq!(sent.headers.get("authorization").unwrap(), "Basic abc");
        assert!(!sent.headers.contains_key("Authorization"));
    }

    #[tokio::test]
    async fn test_generates_correlation_id() {
        let http = Arc::new(RecordingHttpClient::default());
        let client = client_with(http.clone());

        let envelope = client
            .request_raw(Method::Get, "/health", RequestOptions::new())
            .await
            .unwrap();

        let id = envelope.request.request_id.unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_json_body_is_sent() {
        let http = Arc::new(RecordingHttpClient::default());
        let client = client_with(http.clone());

        let _: Envelope<serde_json::Value> = client
            .post("/rooms", &serde_json::json!({ "name": "lab" }), RequestOptions::new())
            .await
            .unwrap();

        let sent = http.requests.lock().unwrap()[0].clone();
        assert_eq!(sent.method, Method::Post);
        assert_eq!(sent.headers.get("Content-Type").unwrap(), "application/json");
        assert_eq!(sent.body.unwrap(), Bytes::from_static(br#"{"name":"lab"}"#));
    }

    #[tokio::test]
    async fn test_transport_failure_is_classified() {
        let client = client_with(Arc::new(FailingHttpClient));
        let error = client
            .request_raw(Method::Get, "/health", RequestOptions::new().request_id("req-1"))
            .await
            .unwrap_err();

        assert_eq!(error.kind, ErrorKind::Network);
        assert_eq!(error.request_id.as_deref(), Some("req-1"));
    }
}
