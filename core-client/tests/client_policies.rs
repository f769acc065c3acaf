//! Retry, cache, cancellation and interceptor behavior of `ApiClient`
//! against a mocked transport.

use async_trait::async_trait;
use bridge_desktop::MemoryKeyValueStore;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bytes::Bytes;
use core_auth::AuthToken;
use core_client::{
    ApiClient, ApiError, Envelope, ErrorKind, Failure, Method, RequestOptions, ResponseBody,
};
use core_runtime::config::{CachePolicy, ClientConfigBuilder, RetryPolicy};
use core_runtime::events::{AuthEvent, CoreEvent, Listener, RequestEvent};
use mockall::mock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

mock! {
    HttpClient {}

    #[async_trait]
    impl HttpClient for HttpClient {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        status_text: String::new(),
        headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
        body: Bytes::from(body.to_string()),
    }
}

fn builder(http: Arc<dyn HttpClient>) -> ClientConfigBuilder {
    ClientConfigBuilder::default()
        .base_url("https://api.example.com")
        .http_client(http)
        .key_value_store(Arc::new(MemoryKeyValueStore::new()))
}

fn client(builder: ClientConfigBuilder) -> ApiClient {
    ApiClient::new(builder.build().unwrap()).unwrap()
}

fn counter(client: &ApiClient, event: &str) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let listener: Listener = Arc::new(move |_event: &CoreEvent| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    client.events().on(event, listener);
    count
}

/// Transport that never answers before `delay`.
struct SlowHttpClient {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowHttpClient {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl HttpClient for SlowHttpClient {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(json_response(200, json!({ "slow": true })))
    }
}

async fn wait_until_in_flight(client: &ApiClient, count: usize) {
    for _ in 0..100 {
        if client.in_flight_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("request never became in flight");
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_makes_exactly_max_attempts() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .times(3)
        .returning(|_| Ok(json_response(503, json!({ "message": "maintenance" }))));

    let client = client(builder(Arc::new(http)).retry(
        RetryPolicy::default()
            .with_max_attempts(3)
            .with_delay(Duration::from_millis(10)),
    ));
    let retries = counter(&client, "request:retrying");

    let error = client
        .get::<Value>("/tasks", RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::Server);
    assert_eq!(error.status, Some(503));
    assert_eq!(error.message, "maintenance");
    assert_eq!(retries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unauthorized_is_fatal_and_forces_logout() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .times(1)
        .returning(|_| Ok(json_response(401, json!({ "error": "token expired" }))));

    let client = client(builder(Arc::new(http)).retry(RetryPolicy::default().with_max_attempts(5)));
    let unauthorized = counter(&client, AuthEvent::UNAUTHORIZED);
    client.auth().set_token(AuthToken::new("stale"));

    let error = client
        .get::<Value>("/rooms", RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::Unauthorized);
    assert_eq!(unauthorized.load(Ordering::SeqCst), 1);
    assert!(!client.auth().is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let mut http = MockHttpClient::new();
    http.expect_execute().times(2).returning(move |_| {
        if c.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(json_response(502, json!({})))
        } else {
            Ok(json_response(200, json!({ "status": "ok" })))
        }
    });

    let client = client(builder(Arc::new(http)));
    let envelope = client
        .get::<Value>("/health", RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(envelope.data["status"], "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_per_call_retry_disable() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .times(1)
        .returning(|_| Ok(json_response(500, json!({}))));

    let client = client(builder(Arc::new(http)));
    let error = client
        .get::<Value>("/health", RequestOptions::new().no_retry())
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::Server);
}

#[tokio::test]
async fn test_get_served_from_cache() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .times(1)
        .returning(|_| Ok(json_response(200, json!([{ "id": "r1" }]))));

    let client = client(builder(Arc::new(http)).enable_cache(true));
    let completed = counter(&client, "request:completed");

    let first: Envelope<Value> = client
        .get("/rooms", RequestOptions::new().param("b", 1).param("a", 2))
        .await
        .unwrap();
    let second: Envelope<Value> = client
        .get("/rooms", RequestOptions::new().param("a", 2).param("b", 1))
        .await
        .unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.data, second.data);
    assert_eq!(client.cache_size(), 1);
    assert_eq!(completed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cache_override_and_non_get_bypass() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .times(4)
        .returning(|_| Ok(json_response(200, json!({ "ok": true }))));

    // Caching is off by default but a per-call policy turns it on.
    let client = client(builder(Arc::new(http)));
    let policy = CachePolicy::with_ttl(Duration::from_secs(60));

    for _ in 0..2 {
        let _: Envelope<Value> = client
            .get("/health", RequestOptions::new().cache(policy))
            .await
            .unwrap();
    }
    assert_eq!(client.cache_size(), 1);

    let _: Envelope<Value> = client
        .get("/health", RequestOptions::new().no_cache())
        .await
        .unwrap();
    for _ in 0..2 {
        let _: Envelope<Value> = client
            .post("/health", &json!({}), RequestOptions::new().cache(policy))
            .await
            .unwrap();
    }
    assert_eq!(client.cache_size(), 1);

    client.clear_cache();
    assert_eq!(client.cache_size(), 0);
}

#[tokio::test]
async fn test_mutation_invalidates_same_path_when_enabled() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .returning(|_| Ok(json_response(200, json!({ "ok": true }))));

    let client = client(
        builder(Arc::new(http))
            .enable_cache(true)
            .invalidate_cache_on_mutation(true),
    );

    let _: Envelope<Value> = client.get("/rooms", RequestOptions::new()).await.unwrap();
    let _: Envelope<Value> = client.get("/tasks", RequestOptions::new()).await.unwrap();
    assert_eq!(client.cache_size(), 2);

    let _: Envelope<Value> = client
        .post("/rooms", &json!({ "name": "lab" }), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(client.cache_size(), 1);

    assert_eq!(client.invalidate_cache("/ta"), 1);
    assert_eq!(client.cache_size(), 0);
}

#[tokio::test]
async fn test_mutation_invalidates_colon_and_absolute_paths() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .times(6)
        .returning(|_| Ok(json_response(200, json!({ "ok": true }))));

    let client = client(
        builder(Arc::new(http))
            .enable_cache(true)
            .invalidate_cache_on_mutation(true),
    );
    let absolute = "https://api.example.com/rooms";

    let _: Envelope<Value> = client
        .get("/tasks/t1:status", RequestOptions::new())
        .await
        .unwrap();
    let _: Envelope<Value> = client.get(absolute, RequestOptions::new()).await.unwrap();
    assert_eq!(client.cache_size(), 2);

    let _: Envelope<Value> = client
        .post("/tasks/t1:status", &json!({}), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(client.cache_size(), 1);
    let _: Envelope<Value> = client
        .post(absolute, &json!({}), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(client.cache_size(), 0);

    // Both entries are gone, so the next reads go to the network.
    let _: Envelope<Value> = client
        .get("/tasks/t1:status", RequestOptions::new())
        .await
        .unwrap();
    let again: Envelope<Value> = client.get(absolute, RequestOptions::new()).await.unwrap();
    assert!(!again.cached);
    assert_eq!(client.invalidate_cache("https://api.example.com/"), 1);
}

#[tokio::test]
async fn test_non_finite_float_params_are_cached_separately() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .times(2)
        .returning(|request| Ok(json_response(200, json!({ "url": request.url }))));

    let client = client(builder(Arc::new(http)).enable_cache(true));

    let nan: Envelope<Value> = client
        .get("/scores", RequestOptions::new().param("x", f64::NAN))
        .await
        .unwrap();
    let inf: Envelope<Value> = client
        .get("/scores", RequestOptions::new().param("x", f64::INFINITY))
        .await
        .unwrap();

    assert!(!inf.cached);
    assert_ne!(nan.data, inf.data);
    assert_eq!(client.cache_size(), 2);
}

#[tokio::test]
async fn test_cache_hit_reports_its_own_request_id() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .times(1)
        .returning(|_| Ok(json_response(200, json!({ "ok": true }))));

    let client = client(builder(Arc::new(http)).enable_cache(true));
    client.auth().set_token(AuthToken::new("secret"));

    let completed_ids = Arc::new(std::sync::Mutex::new(Vec::new()));
    let ids = Arc::clone(&completed_ids);
    let listener: Listener = Arc::new(move |event: &CoreEvent| {
        if let CoreEvent::Request(RequestEvent::Completed { request_id, .. }) = event {
            ids.lock().unwrap().push(request_id.clone());
        }
    });
    client.events().on("request:completed", listener);

    let first: Envelope<Value> = client
        .get("/rooms", RequestOptions::new().request_id("first"))
        .await
        .unwrap();
    let second: Envelope<Value> = client
        .get("/rooms", RequestOptions::new().request_id("second"))
        .await
        .unwrap();
    let third: Envelope<Value> = client.get("/rooms", RequestOptions::new()).await.unwrap();

    assert_eq!(first.request.request_id.as_deref(), Some("first"));
    assert!(second.cached);
    assert_eq!(second.request.request_id.as_deref(), Some("second"));
    assert!(!second
        .request
        .headers
        .keys()
        .any(|name| name.eq_ignore_ascii_case("authorization")));

    let generated = third.request.request_id.clone().unwrap();
    assert!(!generated.is_empty());
    assert_ne!(generated, "first");
    assert_eq!(
        *completed_ids.lock().unwrap(),
        vec!["first".to_string(), "second".to_string(), generated]
    );
}

#[tokio::test]
async fn test_cancel_request_yields_cancelled() {
    let http = Arc::new(SlowHttpClient::new(Duration::from_secs(5)));
    let client = client(builder(http.clone()).no_timeout());

    let task = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .request_raw(Method::Get, "/slow", RequestOptions::new().request_id("slow-1"))
                .await
        })
    };

    wait_until_in_flight(&client, 1).await;
    assert!(client.cancel_request("slow-1"));

    let error = task.await.unwrap().unwrap_err();
    assert_eq!(error.kind, ErrorKind::Cancelled);
    assert_eq!(error.request_id.as_deref(), Some("slow-1"));
    assert_eq!(client.in_flight_count(), 0);
    assert!(!client.cancel_request("slow-1"));
}

#[tokio::test]
async fn test_timeout_yields_timeout() {
    let http = Arc::new(SlowHttpClient::new(Duration::from_secs(5)));
    let client = client(builder(http.clone()).disable_retry());

    let error = client
        .request_raw(
            Method::Get,
            "/slow",
            RequestOptions::new().timeout(Duration::from_millis(5)),
        )
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::Timeout);
    assert_eq!(http.calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.in_flight_count(), 0);
}

#[tokio::test]
async fn test_reused_correlation_id_cancels_previous() {
    let http = Arc::new(SlowHttpClient::new(Duration::from_millis(200)));
    let client = client(builder(http).no_timeout());

    let first = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .request_raw(Method::Get, "/slow", RequestOptions::new().request_id("dup"))
                .await
        })
    };
    wait_until_in_flight(&client, 1).await;

    let second = client
        .request_raw(Method::Get, "/slow", RequestOptions::new().request_id("dup"))
        .await;

    assert_eq!(first.await.unwrap().unwrap_err().kind, ErrorKind::Cancelled);
    assert_eq!(second.unwrap().status, 200);
    assert_eq!(client.in_flight_count(), 0);
}

#[tokio::test]
async fn test_destroy_cancels_everything() {
    let http = Arc::new(SlowHttpClient::new(Duration::from_secs(5)));
    let client = client(builder(http).no_timeout());

    let tasks: Vec<_> = (0..3)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request_raw(
                        Method::Get,
                        "/slow",
                        RequestOptions::new().request_id(format!("req-{i}")),
                    )
                    .await
            })
        })
        .collect();

    wait_until_in_flight(&client, 3).await;
    client.destroy();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap_err().kind, ErrorKind::Cancelled);
    }
    assert_eq!(client.cache_size(), 0);
}

#[tokio::test]
async fn test_response_interceptor_recovery() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .returning(|_| Ok(json_response(200, json!({ "value": 1 }))));

    let client = client(builder(Arc::new(http)));
    client
        .interceptors()
        .response
        .on_fulfilled(|_envelope: Envelope<ResponseBody>| async move {
            Err(Failure::from("post-processing failed"))
        });
    client
        .interceptors()
        .response
        .on_rejected(|_failure: Failure| async move {
            Err(Failure::Api(ApiError::new(ErrorKind::Unknown, "still broken")))
        });
    let recovered = client
        .interceptors()
        .response
        .on_rejected(|_failure: Failure| async move {
            let mut envelope = Envelope {
                data: ResponseBody::Json(json!({ "value": "substitute" })),
                status: 200,
                status_text: "OK".to_string(),
                headers: HashMap::new(),
                request: core_client::RequestDescriptor::new(Method::Get, "/value"),
                cached: false,
                duration: None,
            };
            envelope.headers.insert("x-recovered".to_string(), "1".to_string());
            Ok(envelope)
        });

    let envelope = client
        .get::<Value>("/value", RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(envelope.data["value"], "substitute");
    assert_eq!(envelope.header("X-Recovered"), Some("1"));

    assert!(client.interceptors().response.eject(recovered));
    let error = client
        .get::<Value>("/value", RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(error.message, "still broken");
}

#[tokio::test]
async fn test_request_interceptor_enriches_descriptor() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .withf(|request| {
            request.headers.get("X-Tenant").map(String::as_str) == Some("lab")
                && request.url.ends_with("/tenant?scope=all")
        })
        .times(1)
        .returning(|_| Ok(json_response(200, json!({}))));

    let client = client(builder(Arc::new(http)));
    client
        .interceptors()
        .request
        .on_fulfilled(|mut request: core_client::RequestDescriptor| async move {
            request
                .headers
                .insert("X-Tenant".to_string(), "lab".to_string());
            request
                .params
                .insert("scope".to_string(), "all".into());
            Ok(request)
        });

    client
        .get::<Value>("/tenant", RequestOptions::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_event_carries_classification() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .returning(|_| Ok(json_response(404, json!({ "message": "no such room" }))));

    let client = client(builder(Arc::new(http)));
    let mut stream = client.events().stream();

    let error = client
        .get::<Value>("/rooms/9", RequestOptions::new().request_id("req-404").no_retry())
        .await
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::NotFound);
    assert_eq!(error.message, "no such room");

    let event = stream.try_recv().unwrap().unwrap();
    assert_eq!(
        event,
        CoreEvent::Request(RequestEvent::Failed {
            request_id: "req-404".to_string(),
            method: "GET".to_string(),
            path: "/rooms/9".to_string(),
            kind: "not_found".to_string(),
            status: Some(404),
        })
    );
}
