//! Response types of the session API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity and session window of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub subject_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Response to a logout request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Server health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(default)]
    pub cached_sessions: usize,
    #[serde(default)]
    pub pending_writes: usize,
    #[serde(default)]
    pub flush_running: bool,
}

impl HealthResponse {
    /// Check if the server reports itself healthy.
    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}
