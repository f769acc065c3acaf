//! # Long-running tasks
//!
//! Submit work to the backend, inspect it, and wait for it to finish.
//!
//! [`TasksService::poll_until_complete`] re-fetches the task status on a
//! fixed interval. Exactly one status request is outstanding at a time and
//! the wait between polls is a Tokio timer, so nothing is left scheduled
//! once the future resolves or is dropped.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use core_client::{ApiClient, ApiError, RequestOptions};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const BASE_PATH: &str = "/tasks";

/// Lifecycle of a backend task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

impl TaskSubmission {
    pub fn new(task_type: impl Into<String>, payload: Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Server view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub status: TaskStatus,
    /// Completion ratio in `0.0..=1.0` when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskInfo {
    fn failure_message(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| format!("task ended with status {}", self.status))
    }
}

/// Filters for `GET /tasks`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl TaskQuery {
    fn apply(&self, options: RequestOptions) -> RequestOptions {
        options
            .param("status", self.status.map(|s| s.as_str()))
            .param("limit", self.limit)
            .param("offset", self.offset)
    }
}

/// One page of `GET /tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    pub items: Vec<TaskInfo>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Polling cadence for [`TasksService::poll_until_complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Wait between two status checks.
    pub interval: Duration,
    /// Status checks before giving up.
    pub max_attempts: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150,
        }
    }
}

impl PollOptions {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

#[derive(Clone)]
pub struct TasksService {
    client: ApiClient,
}

impl TasksService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    fn task_path(task_id: &str) -> String {
        format!("{}/{}", BASE_PATH, task_id)
    }

    pub async fn submit(&self, submission: &TaskSubmission) -> Result<TaskInfo> {
        let envelope = self
            .client
            .post(BASE_PATH, submission, RequestOptions::new())
            .await?;
        let task: TaskInfo = envelope.data;
        info!(task_id = %task.id, task_type = %submission.task_type, "Task submitted");
        Ok(task)
    }

    /// Current status. Never served from cache.
    pub async fn status(&self, task_id: &str) -> Result<TaskInfo> {
        let envelope = self
            .client
            .get(&Self::task_path(task_id), RequestOptions::new().no_cache())
            .await?;
        Ok(envelope.data)
    }

    /// Output of a completed task.
    pub async fn result<T: DeserializeOwned>(&self, task_id: &str) -> Result<T> {
        let path = format!("{}/result", Self::task_path(task_id));
        let envelope = self.client.get(&path, RequestOptions::new()).await?;
        Ok(envelope.data)
    }

    pub async fn cancel(&self, task_id: &str) -> Result<TaskInfo> {
        let path = format!("{}/cancel", Self::task_path(task_id));
        let envelope = self
            .client
            .post(&path, &serde_json::json!({}), RequestOptions::new().no_retry())
            .await?;
        info!(task_id, "Task cancellation requested");
        Ok(envelope.data)
    }

    pub async fn list(&self, query: &TaskQuery) -> Result<TaskPage> {
        let envelope = self
            .client
            .get(BASE_PATH, query.apply(RequestOptions::new()))
            .await?;
        Ok(envelope.data)
    }

    /// Polls the task until it reaches a terminal status.
    ///
    /// `on_progress` sees every status snapshot, including the final one.
    /// Resolves with the completed task. Fails with
    /// [`CoreError::TaskFailed`] when the task fails or is cancelled
    /// server-side, [`CoreError::PollingExhausted`] after
    /// `options.max_attempts` non-terminal snapshots, and a cancelled
    /// [`ApiError`] when `cancel` fires. Request errors end polling.
    #[instrument(skip(self, on_progress, cancel), fields(interval_ms = options.interval.as_millis() as u64))]
    pub async fn poll_until_complete<F>(
        &self,
        task_id: &str,
        options: PollOptions,
        mut on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<TaskInfo>
    where
        F: FnMut(&TaskInfo),
    {
        for attempt in 1..=options.max_attempts {
            let task = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(poll_aborted(task_id)),
                status = self.status(task_id) => status?,
            };

            debug!(attempt, status = %task.status, progress = task.progress, "Task status");
            on_progress(&task);

            match task.status {
                TaskStatus::Completed => {
                    info!(attempt, "Task completed");
                    return Ok(task);
                }
                TaskStatus::Failed | TaskStatus::Cancelled => {
                    let message = task.failure_message();
                    warn!(status = %task.status, message = %message, "Task did not complete");
                    return Err(CoreError::TaskFailed {
                        task_id: task.id,
                        message,
                    });
                }
                TaskStatus::Pending | TaskStatus::Running => {}
            }

            if attempt == options.max_attempts {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(poll_aborted(task_id)),
                _ = tokio::time::sleep(options.interval) => {}
            }
        }

        warn!(attempts = options.max_attempts, "Task polling exhausted");
        Err(CoreError::PollingExhausted {
            task_id: task_id.to_string(),
            attempts: options.max_attempts,
        })
    }
}

fn poll_aborted(task_id: &str) -> CoreError {
    debug!(task_id, "Task polling cancelled");
    ApiError::cancelled().into()
}
