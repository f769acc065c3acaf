//! `TasksService::poll_until_complete` against a mocked transport, on a
//! paused clock.

use async_trait::async_trait;
use bridge_desktop::MemoryKeyValueStore;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bytes::Bytes;
use core_service::{
    ClientConfig, CoreError, CoreService, ErrorKind, PollOptions, TaskInfo, TaskStatus,
};
use mockall::mock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

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

fn service(http: MockHttpClient) -> CoreService {
    let config = ClientConfig::builder()
        .base_url("https://api.example.com")
        .http_client(Arc::new(http))
        .key_value_store(Arc::new(MemoryKeyValueStore::new()))
        .disable_retry()
        .build()
        .unwrap();
    CoreService::new(config).unwrap()
}

/// Transport answering `GET /tasks/t1` with the given statuses in order,
/// repeating the last one.
fn status_sequence(statuses: &'static [&'static str], times: usize) -> MockHttpClient {
    let calls = AtomicUsize::new(0);
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .withf(|request| request.url.ends_with("/tasks/t1"))
        .times(times)
        .returning(move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let status = statuses[n.min(statuses.len() - 1)];
            Ok(json_response(
                200,
                json!({ "id": "t1", "status": status, "progress": n as f64 / 10.0 }),
            ))
        });
    http
}

fn fast_polling() -> PollOptions {
    PollOptions::default()
        .with_interval(Duration::from_secs(1))
        .with_max_attempts(5)
}

#[tokio::test(start_paused = true)]
async fn test_resolves_on_completed_and_reports_progress() {
    let core = service(status_sequence(&["pending", "running", "completed"], 3));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);

    let task = core
        .tasks()
        .poll_until_complete(
            "t1",
            fast_polling(),
            move |task: &TaskInfo| recorder.lock().unwrap().push(task.status),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Completed]
    );
}

#[tokio::test(start_paused = true)]
async fn test_waits_the_interval_between_checks() {
    let core = service(status_sequence(&["running", "running", "completed"], 3));
    let started = tokio::time::Instant::now();

    core.tasks()
        .poll_until_complete("t1", fast_polling(), |_| {}, &CancellationToken::new())
        .await
        .unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_rejects_on_failed_status() {
    let mut http = MockHttpClient::new();
    http.expect_execute().times(1).returning(|_| {
        Ok(json_response(
            200,
            json!({ "id": "t1", "status": "failed", "error": "worker crashed" }),
        ))
    });
    let core = service(http);

    let error = core
        .tasks()
        .poll_until_complete("t1", fast_polling(), |_| {}, &CancellationToken::new())
        .await
        .unwrap_err();

    match error {
        CoreError::TaskFailed { task_id, message } => {
            assert_eq!(task_id, "t1");
            assert_eq!(message, "worker crashed");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts() {
    let core = service(status_sequence(&["running"], 3));
    let progress_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&progress_calls);

    let error = core
        .tasks()
        .poll_until_complete(
            "t1",
            fast_polling().with_max_attempts(3),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        CoreError::PollingExhausted { attempts: 3, .. }
    ));
    assert_eq!(progress_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_wait_stops_polling() {
    let core = service(status_sequence(&["running"], 1));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let error = core
        .tasks()
        .poll_until_complete(
            "t1",
            fast_polling().with_interval(Duration::from_secs(60)),
            |_| {},
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(error.is_cancelled());
    assert_eq!(core.client().in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_already_cancelled_token_skips_fetch() {
    let mut http = MockHttpClient::new();
    http.expect_execute().times(0);
    let core = service(http);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = core
        .tasks()
        .poll_until_complete("t1", fast_polling(), |_| {}, &cancel)
        .await
        .unwrap_err();

    assert_eq!(error.kind(), Some(ErrorKind::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_request_error_ends_polling() {
    let mut http = MockHttpClient::new();
    http.expect_execute()
        .times(1)
        .returning(|_| Ok(json_response(404, json!({ "message": "no such task" }))));
    let core = service(http);

    let error = core
        .tasks()
        .poll_until_complete("t1", fast_polling(), |_| {}, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(error.kind(), Some(ErrorKind::NotFound));
    assert_eq!(error.to_string(), "not_found: no such task");
}
