//! Model evaluation runs.
//!
//! Evaluations are slow and expensive on the server, so calls get a long
//! deadline and at most one retry.

use crate::error::Result;
use core_client::{ApiClient, RequestOptions};
use core_runtime::config::{Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

const BASE_PATH: &str = "/evaluation";

/// Deadline for evaluation calls, covering every attempt.
pub const EVALUATION_TIMEOUT: Duration = Duration::from_secs(120);

fn evaluation_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(2)
        .with_delay(Duration::from_secs(2))
        .with_max_delay(Duration::from_secs(2))
        .with_backoff(Backoff::Linear)
}

fn evaluation_options() -> RequestOptions {
    RequestOptions::new()
        .timeout(EVALUATION_TIMEOUT)
        .retry(evaluation_retry())
}

/// Body of `POST /evaluation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub model: String,
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl EvaluationRequest {
    pub fn new(model: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            dataset: dataset.into(),
            parameters: Map::new(),
        }
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Clone)]
pub struct EvaluationService {
    client: ApiClient,
}

impl EvaluationService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult> {
        let result: EvaluationResult = self
            .client
            .post(BASE_PATH, request, evaluation_options())
            .await?
            .data;
        info!(
            evaluation_id = %result.id,
            model = %request.model,
            score = result.score,
            "Evaluation finished"
        );
        Ok(result)
    }

    pub async fn get_result(&self, evaluation_id: &str) -> Result<EvaluationResult> {
        let path = format!("{}/{}", BASE_PATH, evaluation_id);
        Ok(self.client.get(&path, evaluation_options()).await?.data)
    }
}
