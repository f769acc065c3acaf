//! Credential types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default scheme used in the `Authorization` header.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Access credentials issued by the backend.
///
/// Only `access_token` and `refresh_token` are persisted; expiry and token
/// type live for the lifetime of the process.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl AuthToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            token_type: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Sets the expiry relative to `now`.
    pub fn expires_in(self, now: DateTime<Utc>, seconds: i64) -> Self {
        self.with_expires_at(now + Duration::seconds(seconds))
    }

    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = Some(token_type.into());
        self
    }

    /// A token without an expiry never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Value for the `Authorization` header, e.g. `Bearer abc`.
    pub fn authorization_value(&self) -> String {
        format!(
            "{} {}",
            self.token_type.as_deref().unwrap_or(DEFAULT_TOKEN_TYPE),
            self.access_token
        )
    }
}

// Custom Debug implementation to avoid logging tokens
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Authentication state.
///
/// Being authenticated always carries a token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated(AuthToken),
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }

    pub fn token(&self) -> Option<&AuthToken> {
        match self {
            AuthState::Authenticated(token) => Some(token),
            AuthState::Unauthenticated => None,
        }
    }
}
