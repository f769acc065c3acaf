//! Error taxonomy
//!
//! Every failure surfaced by the client is an [`ApiError`] carrying one of
//! a closed set of [`ErrorKind`]s. Callers branch on `kind` and use
//! `status`/`details` for diagnostics.

use crate::response::ResponseBody;
use bridge_traits::error::BridgeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Response header carrying the server-side correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Server,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Server => "server",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Maps an HTTP status code to a kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::Validation,
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            500 | 502 | 503 | 504 => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        }
    }

    /// Kinds that retrying cannot change.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::Cancelled
                | ErrorKind::Unauthorized
                | ErrorKind::Forbidden
                | ErrorKind::Validation
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error returned by every client operation.
///
/// Constructed once where the failure is first classified and passed along
/// unchanged afterwards.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            details: None,
            timestamp: Utc::now(),
            request_id: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sets the correlation id unless one was already attached.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        if self.request_id.is_none() {
            self.request_id = Some(request_id.into());
        }
        self
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Request was cancelled")
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Request timed out after {}ms", after.as_millis()),
        )
    }

    /// Classifies a non-2xx response.
    ///
    /// The message is taken from a string `message` or `error` field of a
    /// JSON body when present. A JSON body is kept as `details`.
    pub fn from_response(
        status: u16,
        status_text: &str,
        body: &ResponseBody,
        headers: &HashMap<String, String>,
    ) -> Self {
        let kind = ErrorKind::from_status(status);

        let body_message = body.as_json().and_then(|json| {
            ["message", "error"]
                .iter()
                .find_map(|field| json.get(field).and_then(Value::as_str))
                .map(str::to_string)
        });

        let message = body_message.unwrap_or_else(|| {
            if status_text.is_empty() {
                format!("Request failed with status {}", status)
            } else {
                format!("Request failed with status {}: {}", status, status_text)
            }
        });

        let mut error = Self::new(kind, message).with_status(status);
        if let Some(json) = body.as_json() {
            error.details = Some(json.clone());
        }
        error.request_id = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(REQUEST_ID_HEADER))
            .map(|(_, value)| value.clone());
        error
    }

    /// Classifies any failure.
    ///
    /// An already classified [`ApiError`] is returned unchanged.
    pub fn classify(failure: impl Into<Failure>) -> Self {
        match failure.into() {
            Failure::Api(error) => error,
            Failure::Transport(error) => {
                let kind = if error.is_timeout() {
                    ErrorKind::Timeout
                } else if error.is_network() {
                    ErrorKind::Network
                } else {
                    ErrorKind::Unknown
                };
                Self::new(kind, error.to_string())
            }
            Failure::Decode(error) => Self::new(ErrorKind::Unknown, "Failed to parse response body")
                .with_details(Value::String(error.to_string())),
            Failure::Other(message) => Self::new(ErrorKind::Unknown, message),
        }
    }
}

/// Any failure raised while a request is processed, before classification.
///
/// Interceptor stages return this so they can raise transport, decode or
/// plain failures as well as already classified errors.
#[derive(Error, Debug)]
pub enum Failure {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Transport(#[from] BridgeError),

    #[error(transparent)]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Failure::Other(message)
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Failure::Other(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
