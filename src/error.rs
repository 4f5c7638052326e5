//! Error types for linkbroker.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Server error: {0}")]
    Server(String),
}

/// Errors raised while decoding an inbound frame.
///
/// Both variants are reported back to the offending connection as an
/// `error` frame; neither closes the socket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    Malformed,

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}
