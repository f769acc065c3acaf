use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The transport could not reach the remote host (DNS, connect, reset).
    #[error("Network failure: {0}")]
    Network(String),

    /// The transport gave up waiting on its own deadline.
    #[error("Transport timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the failure happened below HTTP, before any status was received.
    pub fn is_network(&self) -> bool {
        matches!(self, BridgeError::Network(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
