//! Retry execution

use crate::error::Result;
use core_runtime::config::RetryPolicy;
use core_runtime::events::{CoreEvent, EventBus, RequestEvent};
use std::future::Future;
use tracing::{debug, warn};

/// Runs `attempt` until it succeeds, fails fatally or the policy is exhausted.
///
/// Without a policy the operation runs once. Attempts never overlap; the
/// delay before attempt `n + 1` is [`RetryPolicy::delay_after`]`(n)`. The last
/// error is returned once attempts are exhausted.
pub(crate) async fn run_with_retry<T, F, Fut>(
    policy: Option<&RetryPolicy>,
    request_id: &str,
    events: &EventBus,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.map_or(1, |p| p.max_attempts.max(1));
    let mut current = 1;

    loop {
        let error = match attempt(current).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error.kind.is_fatal() {
            debug!(request_id, kind = %error.kind, "Not retrying fatal error");
            return Err(error);
        }

        let Some(policy) = policy.filter(|_| current < max_attempts) else {
            if max_attempts > 1 {
                warn!(
                    request_id,
                    attempts = current,
                    kind = %error.kind,
                    "Request failed after exhausting retries"
                );
            }
            return Err(error);
        };

        let delay = policy.delay_after(current);
        warn!(
            request_id,
            attempt = current,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            kind = %error.kind,
            "Request attempt failed, retrying"
        );
        events.emit(CoreEvent::Request(RequestEvent::Retrying {
            request_id: request_id.to_string(),
            attempt: current,
            delay_ms: delay.as_millis() as u64,
            kind: error.kind.as_str().to_string(),
        }));

        tokio::time::sleep(delay).await;
        current += 1;
    }
}
