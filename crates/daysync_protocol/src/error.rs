//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding protocol values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The cookie string could not be decoded.
    #[error("invalid cookie: {0}")]
    InvalidCookie(String),

    /// The client view name is not one the server knows about.
    #[error("unknown client view: {0}")]
    UnknownClientView(String),
}
