use thiserror::Error;

/// Authentication errors.
///
/// `Clone` so every caller joined on a single refresh observes the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Token storage unavailable: {0}")]
    Storage(String),

    #[error("Not authenticated")]
    NotAuthenticated,
}

impl From<bridge_traits::BridgeError> for AuthError {
    fn from(err: bridge_traits::BridgeError) -> Self {
        AuthError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
