//! Error types for session-validity operations.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Error type for durable-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not complete within the configured timeout.
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// A stored document could not be decoded into its record type.
    #[error("Corrupt document {collection}/{key}: {reason}")]
    Corrupt {
        collection: String,
        key: String,
        reason: String,
    },

    /// Encoding a record for storage failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the store could not be consulted at all.
    ///
    /// Callers must treat this as "unknown", never as "absent".
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Result type for durable-store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error type for session engine operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The credential was issued before the subject's most recent logout.
    #[error("Credential for {subject_id} was revoked at {logged_out_at}")]
    Revoked {
        subject_id: String,
        logged_out_at: DateTime<Utc>,
    },

    /// The session timed out from inactivity; the subject must re-authenticate.
    #[error("Session for {subject_id} expired, must re-authenticate")]
    Expired { subject_id: String },

    /// The durable store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// True when the failure is infrastructure unavailability.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SessionError::Store(e) if e.is_unavailable())
    }
}

/// Result type for session engine operations.
pub type Result<T> = std::result::Result<T, SessionError>;
