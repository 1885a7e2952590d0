//! Session and logout endpoints.

use axum::{Extension, Json, extract::State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::AuthenticatedUser;
use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Identity and session window of the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub subject_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Logout acknowledgement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// `GET /api/v1/auth/session`
pub async fn session_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SessionResponse>> {
    // Another request may have logged the subject out since the middleware ran.
    let record = state
        .engine
        .session(&user.subject_id)
        .await?
        .ok_or_else(|| ServerError::SessionExpired("no live session".to_string()))?;

    Ok(Json(SessionResponse {
        subject_id: user.subject_id,
        email: user.email,
        display_name: user.display_name,
        session_id: record.session_id,
        created_at: record.created_at,
        last_activity_at: record.last_activity_at,
        expires_at: record.expires_at,
    }))
}

/// `POST /api/v1/auth/logout`
///
/// Idempotent: logging out a subject with no session still succeeds. A
/// credential already revoked by an earlier logout is acknowledged without
/// recording another one, so it cannot end a newer session.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<LogoutResponse>> {
    if state
        .engine
        .was_issued_before_logout(&user.subject_id, user.issued_at)
        .await?
    {
        debug!(subject_id = %user.subject_id, "Logout with revoked credential ignored");
        return Ok(Json(LogoutResponse { success: true }));
    }

    state.engine.clear_session(&user.subject_id).await?;
    info!(subject_id = %user.subject_id, "Logged out");
    Ok(Json(LogoutResponse { success: true }))
}
