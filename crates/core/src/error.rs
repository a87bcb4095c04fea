//! Error types for classboard-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed envelope or payload. The frame is dropped, the connection stays open.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Message {0} is missing its payload")]
    MissingPayload(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Move or end for a stroke id with no builder. Expected during reconnection.
    #[error("Unknown stroke: {0}")]
    UnknownStroke(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Connect failure: {0}")]
    ConnectFailure(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl CoreError {
    /// Whether this error should trigger the client reconnect path.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            CoreError::ConnectionLost(_) | CoreError::ConnectFailure(_) | CoreError::NotConnected
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<quinn::ConnectionError> for CoreError {
    fn from(err: quinn::ConnectionError) -> Self {
        CoreError::ConnectionLost(err.to_string())
    }
}

impl From<quinn::ConnectError> for CoreError {
    fn from(err: quinn::ConnectError) -> Self {
        CoreError::ConnectFailure(err.to_string())
    }
}

impl From<quinn::WriteError> for CoreError {
    fn from(err: quinn::WriteError) -> Self {
        CoreError::ConnectionLost(err.to_string())
    }
}

impl From<quinn::ReadExactError> for CoreError {
    fn from(err: quinn::ReadExactError) -> Self {
        CoreError::ConnectionLost(err.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for CoreError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        CoreError::Decode(err.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for CoreError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        CoreError::Encode(err.to_string())
    }
}
