use core_auth::AuthError;
use core_client::{ApiError, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },

    #[error("Task {task_id} did not finish after {attempts} status checks")]
    PollingExhausted { task_id: String, attempts: u32 },
}

impl CoreError {
    /// The request error kind, when the failure came from the client.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CoreError::Api(error) => Some(error.kind),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == Some(ErrorKind::Cancelled)
    }
}

impl From<core_runtime::Error> for CoreError {
    fn from(error: core_runtime::Error) -> Self {
        match error {
            core_runtime::Error::CapabilityMissing {
                capability,
                message,
            } => CoreError::CapabilityMissing {
                capability,
                message,
            },
            core_runtime::Error::Config(message) => CoreError::Config(message),
            core_runtime::Error::Internal(message) => CoreError::InitializationFailed(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_errors_keep_their_category() {
        let missing: CoreError = core_runtime::Error::CapabilityMissing {
            capability: "HttpClient".to_string(),
            message: "no transport".to_string(),
        }
        .into();
        assert!(matches!(missing, CoreError::CapabilityMissing { .. }));

        let config: CoreError = core_runtime::Error::Config("bad url".to_string()).into();
        assert_eq!(config.to_string(), "Configuration error: bad url");
        assert_eq!(config.kind(), None);
    }

    #[test]
    fn test_api_errors_expose_kind() {
        let error = CoreError::from(ApiError::cancelled());
        assert_eq!(error.kind(), Some(ErrorKind::Cancelled));
        assert!(error.is_cancelled());
        assert_eq!(error.to_string(), "cancelled: Request was cancelled");
    }
}
