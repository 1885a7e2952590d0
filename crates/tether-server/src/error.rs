//! Error types for the server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_session::{SessionError, StoreError};
use thiserror::Error;

use crate::verify::VerifyError;

/// Machine-readable error code carried in every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionExpired,
    TokenExpired,
    AuthFailed,
    ServiceUnavailable,
    InternalError,
}

impl ErrorCode {
    /// Wire name of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::SessionExpired => "SESSION_EXPIRED",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Credential missing, malformed or forged.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Credential past its expiry; the client may refresh it.
    #[error("Token has expired")]
    TokenExpired,

    /// Session revoked or timed out; the client must sign in again.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The session store could not be consulted.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Error code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::AuthFailed(_) => ErrorCode::AuthFailed,
            ServerError::TokenExpired => ErrorCode::TokenExpired,
            ServerError::SessionExpired(_) => ErrorCode::SessionExpired,
            ServerError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            ServerError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// HTTP status for the error.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::AuthFailed(_)
            | ServerError::TokenExpired
            | ServerError::SessionExpired(_) => StatusCode::UNAUTHORIZED,
            ServerError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SessionError> for ServerError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Revoked { .. } => {
                ServerError::SessionExpired("credential was revoked by logout".to_string())
            }
            SessionError::Expired { .. } => {
                ServerError::SessionExpired("session timed out from inactivity".to_string())
            }
            SessionError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        if e.is_unavailable() {
            ServerError::ServiceUnavailable(e.to_string())
        } else {
            ServerError::Internal(e.to_string())
        }
    }
}

impl From<VerifyError> for ServerError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::Expired => ServerError::TokenExpired,
            VerifyError::Invalid(reason) => ServerError::AuthFailed(reason),
        }
    }
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// The client must discard its credential and sign in again.
    pub requires_logout: bool,
    pub session_expired: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<&ServerError> for ErrorResponse {
    fn from(e: &ServerError) -> Self {
        let session_expired = matches!(e, ServerError::SessionExpired(_));
        Self {
            code: e.code(),
            message: e.to_string(),
            requires_logout: session_expired,
            session_expired,
            timestamp: Utc::now(),
        }
    }
}

/// The [`ErrorCode`] is attached to the response extensions for the request
/// log.
impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse::from(&self);
        let code = body.code;

        if status.is_server_error() {
            tracing::error!(status = %status, code = code.as_str(), error = %body.message, "Server error");
        } else {
            tracing::debug!(status = %status, code = code.as_str(), error = %body.message, "Request rejected");
        }

        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(code);
        response
    }
}
