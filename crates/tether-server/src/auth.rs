//! Authentication middleware.
//!
//! Every protected request carries a bearer credential. The credential is
//! verified, its subject's session is established or confirmed, and the
//! activity window is extended before the handler runs.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ServerError};
use crate::state::AppState;
use crate::verify::VerifiedIdentity;

/// Identity of the caller, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub subject_id: String,
    pub issued_at: DateTime<Utc>,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl From<VerifiedIdentity> for AuthenticatedUser {
    fn from(identity: VerifiedIdentity) -> Self {
        Self {
            subject_id: identity.subject_id,
            issued_at: identity.issued_at,
            email: identity.email,
            display_name: identity.display_name,
        }
    }
}

/// Session-enforcing authentication middleware.
///
/// Rejects credentials issued before the subject's last logout and sessions
/// that timed out. A request that finds a live session extends it. Once the
/// credential verifies, the caller is attached to the response extensions,
/// rejected or not.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let user = match verify_request(request.headers(), &state).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    let mut response = match establish_session(&state, &user).await {
        Ok(()) => {
            request.extensions_mut().insert(user.clone());
            next.run(request).await
        }
        Err(e) => e.into_response(),
    };
    response.extensions_mut().insert(user);
    response
}

/// Credential-only middleware.
///
/// Verifies the bearer credential without consulting the session. Used by
/// logout, which must succeed for a subject whose session is already gone.
pub async fn credential_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let user = match verify_request(request.headers(), &state).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    request.extensions_mut().insert(user.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(user);
    response
}

async fn establish_session(state: &AppState, user: &AuthenticatedUser) -> Result<()> {
    let created = state
        .engine
        .ensure_session(&user.subject_id, Some(user.issued_at))
        .await?;
    if !created {
        state.engine.update_last_activity(&user.subject_id).await;
    }
    Ok(())
}

async fn verify_request(headers: &HeaderMap, state: &AppState) -> Result<AuthenticatedUser> {
    let token = bearer_token(headers)?;
    let identity = state.verifier.verify(token).await?;
    debug!(subject_id = %identity.subject_id, "Credential verified");
    Ok(identity.into())
}

fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ServerError::AuthFailed("missing authorization header".to_string()))?;
    let value = header
        .to_str()
        .map_err(|_| ServerError::AuthFailed("invalid authorization header".to_string()))?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(ServerError::AuthFailed(
            "expected a bearer credential".to_string(),
        )),
    }
}
