use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error was raised while validating configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::CapabilityMissing { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
