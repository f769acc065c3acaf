//! Backend health checks.
//!
//! Health responses are cached briefly and retried aggressively, since the
//! endpoint is cheap and callers poll it from status indicators.

use crate::error::Result;
use core_client::{ApiClient, ErrorKind, Method, RequestOptions};
use core_runtime::config::{Backoff, CachePolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const BASE_PATH: &str = "/health";

/// How long a health response is served from cache.
pub const HEALTH_CACHE_TTL: Duration = Duration::from_secs(10);

const PING_TIMEOUT: Duration = Duration::from_secs(5);

fn health_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(5)
        .with_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(4))
        .with_backoff(Backoff::Exponential)
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    /// Per-dependency status, e.g. `"database" => "ok"`.
    #[serde(default)]
    pub services: HashMap<String, String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "healthy" | "up")
    }
}

#[derive(Clone)]
pub struct HealthService {
    client: ApiClient,
}

impl HealthService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Fetches the backend health report.
    pub async fn check(&self) -> Result<HealthStatus> {
        let options = RequestOptions::new()
            .cache(CachePolicy::with_ttl(HEALTH_CACHE_TTL))
            .retry(health_retry());
        let envelope = self.client.get(BASE_PATH, options).await?;
        Ok(envelope.data)
    }

    /// Whether the backend answers at all.
    ///
    /// Connectivity failures report `false`; errors that indicate a
    /// misconfigured client (auth, validation) are returned.
    pub async fn ping(&self) -> Result<bool> {
        let options = RequestOptions::new()
            .no_cache()
            .no_retry()
            .timeout(PING_TIMEOUT);
        let path = format!("{}/ping", BASE_PATH);

        match self.client.request_raw(Method::Get, &path, options).await {
            Ok(_) => Ok(true),
            Err(error)
                if matches!(
                    error.kind,
                    ErrorKind::Network
                        | ErrorKind::Timeout
                        | ErrorKind::Server
                        | ErrorKind::NotFound
                        | ErrorKind::Unknown
                ) =>
            {
                debug!(kind = %error.kind, "Health ping failed");
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }
}
