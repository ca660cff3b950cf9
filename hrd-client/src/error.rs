use std::fmt;

/// Errors that can occur during client operations
#[derive(Debug)]
pub enum ClientError {
    /// Failed to establish a connection to the broker
    ConnectionFailed(std::io::Error),
    /// Connection was closed by the broker
    ConnectionClosed,
    /// I/O error during communication
    IoError(std::io::Error),
    /// Protocol-level error (malformed frame, unsupported version)
    ProtocolError(String),
    /// Received a reply of the wrong kind for the request
    InvalidResponse(String),
    /// Operation timed out
    Timeout,
    /// Broker answered with an `Error` message
    ServerError(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            Self::ConnectionClosed => write!(f, "Connection closed by broker"),
            Self::IoError(e) => write!(f, "I/O error: {}", e),
            Self::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            Self::Timeout => write!(f, "Operation timed out"),
            Self::ServerError(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl ClientError {
    /// Returns true if reconnecting and retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::ConnectionFailed(_) | Self::IoError(_) | Self::Timeout
        )
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConnectionFailed(e) | Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<hrd_core::HeraldError> for ClientError {
    fn from(err: hrd_core::HeraldError) -> Self {
        use hrd_core::HeraldError;

        match err {
            HeraldError::Io(e) => Self::IoError(e),
            HeraldError::Timeout(_) => Self::Timeout,
            HeraldError::ConnectionClosed => Self::ConnectionClosed,
            HeraldError::UnexpectedResponse(msg) => Self::InvalidResponse(msg),
            other => Self::ProtocolError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
