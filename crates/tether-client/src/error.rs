//! Client error types.

use serde::Deserialize;
use thiserror::Error;

use crate::credential::CredentialError;

/// Server error code: the session is gone and the user must sign in again.
pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";

/// Server error code: the bearer credential expired and may be refreshed.
pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server returned an error response.
    #[error("API error ({status} {code}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error code from server.
        code: String,
        /// Error message from server.
        message: String,
    },

    /// Reading the current credential failed.
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// The server ended the session. The user has been signed out.
    #[error("Session expired, sign in again")]
    SessionExpired,

    /// The credential kept expiring after the allowed number of refreshes.
    #[error("Credential still expired after {attempts} refresh attempt(s)")]
    RetriesExhausted {
        /// Refreshes attempted for the request.
        attempts: u32,
    },

    /// Refreshing the credential failed. The user has been signed out.
    #[error("Credential refresh failed")]
    RefreshFailed {
        /// Underlying refresh error.
        source: CredentialError,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this is an authentication error.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Error::Api { status: 401, .. }
                | Error::SessionExpired
                | Error::RetriesExhausted { .. }
                | Error::RefreshFailed { .. }
        )
    }

    /// Check if the user was signed out as a result of this error.
    pub fn is_signed_out(&self) -> bool {
        matches!(
            self,
            Error::SessionExpired | Error::RetriesExhausted { .. } | Error::RefreshFailed { .. }
        )
    }

    /// Check if this is a server error.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Api { status, .. } if *status >= 500)
    }

    /// Server error code of a 401 response.
    pub fn unauthorized_code(&self) -> Option<&str> {
        match self {
            Error::Api {
                status: 401, code, ..
            } => Some(code),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error response from the server.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub code: String,
    pub message: String,
}
