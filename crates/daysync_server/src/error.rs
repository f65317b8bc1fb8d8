//! Error types for the sync server.

use crate::collaborator::DomainError;
use crate::registry::RegistryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use daysync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A client tried to move its ordinal backwards.
    #[error("out of order mutation for client {client_id}: current {current}, attempted {attempted}")]
    OutOfOrderMutation {
        /// Client whose ordinal was involved.
        client_id: String,
        /// Stored last mutation id.
        current: u64,
        /// Id the caller tried to store.
        attempted: u64,
    },

    /// A push skipped one or more mutation ids.
    #[error("missing mutation for client {client_id}: expected {expected}, got {actual}")]
    MissingMutation {
        /// Client whose sequence has a gap.
        client_id: String,
        /// Next id the server would accept.
        expected: u64,
        /// Id found in the batch.
        actual: u64,
    },

    /// No collaborator serves this client view.
    #[error("unknown client view: {0}")]
    UnknownClientView(String),

    /// Domain collaborator failure outside of a push batch.
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// Connection registry failure.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownClientView(name) => ServerError::UnknownClientView(name),
            other => ServerError::InvalidRequest(other.to_string()),
        }
    }
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::AuthenticationFailed(_)
                | ServerError::OutOfOrderMutation { .. }
                | ServerError::MissingMutation { .. }
                | ServerError::UnknownClientView(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns true if the client must drop its cookie and pull from scratch.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            ServerError::OutOfOrderMutation { .. } | ServerError::MissingMutation { .. }
        )
    }

    /// Returns a stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::AuthenticationFailed(_) => "authentication_failed",
            ServerError::OutOfOrderMutation { .. } => "out_of_order_mutation",
            ServerError::MissingMutation { .. } => "missing_mutation",
            ServerError::UnknownClientView(_) => "unknown_client_view",
            ServerError::Domain(_) => "domain_error",
            ServerError::Registry(_) => "registry_error",
            ServerError::Internal(_) | ServerError::Io(_) => "internal",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) | ServerError::UnknownClientView(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            ServerError::OutOfOrderMutation { .. } | ServerError::MissingMutation { .. } => {
                StatusCode::CONFLICT
            }
            ServerError::Domain(_)
            | ServerError::Registry(_)
            | ServerError::Internal(_)
            | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Server-side failures never expose their details to the client.
        let message = if self.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = serde_json::json!({
            "error": self.code(),
            "message": message,
            "resync": self.requires_resync(),
        });

        (status, Json(body)).into_response()
    }
}
