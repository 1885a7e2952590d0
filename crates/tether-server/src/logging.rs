//! Session outcome log.
//!
//! One event per request naming the subject and, for rejections, the error
//! code the client acts on. Spans and timing come from the `TraceLayer`.

use axum::{
    body::Body,
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, info, warn};

use crate::auth::AuthenticatedUser;
use crate::error::ErrorCode;
use crate::state::AppState;

/// Log how the session layer handled the request.
///
/// Reads the [`AuthenticatedUser`] and [`ErrorCode`] extensions the auth
/// middlewares and [`ServerError`](crate::ServerError) leave on the response.
/// The level follows what the client has to do next: expired credentials are
/// routine refreshes, ended sessions mean signing in again.
pub async fn request_logging_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.request_logging {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    let outcome = Outcome {
        method: &method,
        path: &path,
        status: response.status().as_u16(),
        subject_id: response
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.subject_id.as_str()),
    };
    outcome.log(response.extensions().get::<ErrorCode>().copied());
    response
}

struct Outcome<'a> {
    method: &'a Method,
    path: &'a str,
    status: u16,
    subject_id: Option<&'a str>,
}

impl Outcome<'_> {
    fn log(&self, code: Option<ErrorCode>) {
        let Outcome {
            method,
            path,
            status,
            subject_id,
        } = *self;

        match code {
            None => info!(%method, path, status, subject_id, "Request served"),
            Some(ErrorCode::TokenExpired) => debug!(
                %method,
                path,
                status,
                subject_id,
                code = ErrorCode::TokenExpired.as_str(),
                "Credential expired, client should refresh"
            ),
            Some(ErrorCode::SessionExpired) => info!(
                %method,
                path,
                status,
                subject_id,
                code = ErrorCode::SessionExpired.as_str(),
                "Session ended, client must sign in again"
            ),
            Some(ErrorCode::AuthFailed) => warn!(
                %method,
                path,
                status,
                code = ErrorCode::AuthFailed.as_str(),
                "Credential rejected"
            ),
            Some(code) => error!(
                %method,
                path,
                status,
                subject_id,
                code = code.as_str(),
                "Session layer failed"
            ),
        }
    }
}
