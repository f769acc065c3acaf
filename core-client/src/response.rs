//! Response envelopes

use crate::error::{ApiError, ErrorKind, Failure};
use crate::request::RequestDescriptor;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Parsed response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Binary(Bytes),
    Empty,
}

impl ResponseBody {
    /// Parses `bytes` according to the declared content type.
    ///
    /// `204` and empty bodies are [`ResponseBody::Empty`]. JSON content types
    /// are parsed, `text/*` is read as text and anything else stays binary.
    pub fn parse(
        status: u16,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> std::result::Result<Self, serde_json::Error> {
        if status == 204 || bytes.is_empty() {
            return Ok(ResponseBody::Empty);
        }

        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if mime == "application/json" || mime.ends_with("+json") {
            serde_json::from_slice(&bytes).map(ResponseBody::Json)
        } else if mime.starts_with("text/") {
            Ok(ResponseBody::Text(String::from_utf8_lossy(&bytes).into_owned()))
        } else {
            Ok(ResponseBody::Binary(bytes))
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }
}

/// A completed response.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub data: T,
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    /// The descriptor as it left the request interceptors.
    pub request: RequestDescriptor,
    /// Whether this envelope was served from the cache.
    pub cached: bool,
    /// Elapsed time from the start of the request to completion.
    pub duration: Option<Duration>,
}

impl<T> Envelope<T> {
    pub fn map<U, F>(self, f: F) -> Envelope<U>
    where
        F: FnOnce(T) -> U,
    {
        Envelope {
            data: f(self.data),
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            request: self.request,
            cached: self.cached,
            duration: self.duration,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl Envelope<ResponseBody> {
    /// Deserializes the body into `T`.
    ///
    /// An empty body decodes as JSON `null` and a text body as a JSON string.
    pub fn decode<T: DeserializeOwned>(self) -> Result<Envelope<T>, ApiError> {
        let request_id = self.request.request_id.clone();
        let value = match &self.data {
            ResponseBody::Json(value) => value.clone(),
            ResponseBody::Text(text) => Value::String(text.clone()),
            ResponseBody::Empty => Value::Null,
            ResponseBody::Binary(_) => {
                let error = ApiError::new(ErrorKind::Unknown, "Cannot decode a binary body")
                    .with_status(self.status);
                return Err(attach(error, request_id));
            }
        };

        match serde_json::from_value(value) {
            Ok(data) => Ok(self.map(|_| data)),
            Err(e) => {
                let error = ApiError::classify(Failure::Decode(e)).with_status(self.status);
                Err(attach(error, request_id))
            }
        }
    }
}

fn attach(error: ApiError, request_id: Option<String>) -> ApiError {
    match request_id {
        Some(id) => error.with_request_id(id),
        None => error,
    }
}
