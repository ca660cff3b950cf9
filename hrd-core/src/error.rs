use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeraldError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic bytes - expected HRLD")]
    InvalidMagic,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown message tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("Payload too large: {0} bytes exceeds maximum")]
    PayloadTooLarge(usize),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timed out: {0}")]
    Timeout(&'static str),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HeraldError {
    /// Transient failures abandon a single attempt and are never fatal to the node.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout(_) | Self::ConnectionClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, HeraldError>;
