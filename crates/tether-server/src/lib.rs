//! HTTP boundary for the tether session engine.
//!
//! Verifies bearer credentials, enforces session validity on every protected
//! request, and exposes logout and session-introspection endpoints.
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//! use std::sync::Arc;
//! use tether_server::{JwtVerifier, Server, ServerConfig};
//! use tether_session::{EngineConfig, SessionEngine, SqliteStore};
//!
//! let store = Arc::new(SqliteStore::open(Path::new("tether.db"))?);
//! let engine = Arc::new(SessionEngine::new(store, EngineConfig::default()));
//! let verifier = Arc::new(JwtVerifier::new(b"secret"));
//!
//! Server::new(engine, verifier, ServerConfig::new()).run().await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod state;
pub mod verify;

pub use auth::{AuthenticatedUser, auth_middleware, credential_middleware};
pub use config::{DEFAULT_BIND_ADDRESS, ServerConfig};
pub use error::{ErrorCode, ErrorResponse, Result, ServerError};
pub use logging::request_logging_middleware;
pub use state::AppState;
pub use verify::{
    Claims, DEFAULT_LEEWAY_SECS, JwtVerifier, VerifiedIdentity, VerifyError, Verifier,
    issue_token,
};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware};
use tether_session::SessionEngine;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The tether HTTP server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a new server around an engine and a verifier.
    pub fn new(engine: Arc<SessionEngine>, verifier: Arc<dyn Verifier>, config: ServerConfig) -> Self {
        Self {
            state: AppState::new(engine, verifier, config),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(routes::health_routes())
            .nest("/api/v1", self.api_routes())
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                logging::request_logging_middleware,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// API routes (v1).
    ///
    /// Logout only needs a valid credential; every other route requires a
    /// live session.
    fn api_routes(&self) -> Router<AppState> {
        use axum::routing::{get, post};

        let logout = Router::new()
            .route("/auth/logout", post(routes::logout_handler))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::credential_middleware,
            ));

        Router::new()
            .route("/auth/session", get(routes::session_handler))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::auth_middleware,
            ))
            .merge(logout)
    }

    /// Run the server on the configured address until the process exits.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr).await
    }

    /// Run the server on a specific address (useful for testing).
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let listener = bind(addr).await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Serve on an already-bound listener until `shutdown` completes.
    ///
    /// In-flight requests finish before this returns. Flushing the engine is
    /// left to the caller.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        if let Ok(addr) = listener.local_addr() {
            info!("Starting server on {}", addr);
        }

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)))?;

        info!("Server stopped");
        Ok(())
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }

    /// Get the session engine.
    pub fn engine(&self) -> &Arc<SessionEngine> {
        &self.state.engine
    }
}

/// Bind a TCP listener.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Internal(format!("Failed to bind: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::{Duration, Utc};
    use tether_session::{EngineConfig, ManualClock, MemoryStore, SessionStatus};
    use tower::ServiceExt;

    const SECRET: &[u8] = b"router-test-secret";

    fn create_test_server() -> Server {
        let engine = Arc::new(SessionEngine::new(
            Arc::new(MemoryStore::new()),
            EngineConfig::default(),
        ));
        Server::new(engine, Arc::new(JwtVerifier::new(SECRET)), ServerConfig::new())
    }

    fn bearer(subject: &str) -> String {
        let claims = Claims::new(subject, Utc::now() - Duration::seconds(5), Duration::hours(1));
        format!("Bearer {}", issue_token(SECRET, &claims).unwrap())
    }

    #[tokio::test]
    async fn test_server_health_endpoint() {
        let app = create_test_server().router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_session_requires_auth() {
        let app = create_test_server().router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/auth/session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_session_endpoint_reports_window() {
        let server = create_test_server();
        let engine = server.engine().clone();
        let app = server.router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/auth/session")
                    .header("Authorization", bearer("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let record = engine.session("alice").await.unwrap().unwrap();
        assert_eq!(json["subjectId"], "alice");
        assert_eq!(json["sessionId"], record.session_id.as_str());
        assert!(json["expiresAt"].is_string());
    }

    #[tokio::test]
    async fn test_logout_without_session_succeeds() {
        let server = create_test_server();
        let engine = server.engine().clone();
        let app = server.router();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/auth/logout")
                    .header("Authorization", bearer("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"success":true}"#);
        assert_eq!(engine.validate("alice").await.unwrap(), SessionStatus::NotFound);
        assert!(engine.ledger().logged_out_at("alice").await.unwrap().is_some());
    }

    fn token_at(subject: &str, issued_at: chrono::DateTime<Utc>) -> String {
        let claims = Claims::new(subject, issued_at, Duration::hours(1));
        format!("Bearer {}", issue_token(SECRET, &claims).unwrap())
    }

    async fn send(app: &Router, method: &str, uri: &str, authorization: &str) -> StatusCode {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("Authorization", authorization)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_revoked_credential_cannot_end_newer_session() {
        let clock = ManualClock::new(Utc::now());
        let engine = Arc::new(SessionEngine::with_clock(
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
            EngineConfig::default(),
        ));
        let server = Server::new(
            engine.clone(),
            Arc::new(JwtVerifier::new(SECRET)),
            ServerConfig::new(),
        );
        let app = server.router();

        let old = token_at("alice", Utc::now() - Duration::minutes(5));
        assert_eq!(send(&app, "GET", "/api/v1/auth/session", &old).await, StatusCode::OK);
        assert_eq!(send(&app, "POST", "/api/v1/auth/logout", &old).await, StatusCode::OK);
        let logged_out_at = engine.ledger().logged_out_at("alice").await.unwrap().unwrap();

        clock.advance(Duration::seconds(5));
        let fresh = token_at("alice", Utc::now() + Duration::seconds(2));
        assert_eq!(send(&app, "GET", "/api/v1/auth/session", &fresh).await, StatusCode::OK);
        let live = engine.session("alice").await.unwrap().unwrap();

        // Replaying the revoked credential is acknowledged but changes nothing.
        clock.advance(Duration::seconds(5));
        assert_eq!(send(&app, "POST", "/api/v1/auth/logout", &old).await, StatusCode::OK);
        assert_eq!(
            engine.ledger().logged_out_at("alice").await.unwrap(),
            Some(logged_out_at)
        );
        assert_eq!(send(&app, "GET", "/api/v1/auth/session", &fresh).await, StatusCode::OK);
        let after = engine.session("alice").await.unwrap().unwrap();
        assert_eq!(after.session_id, live.session_id);
    }
}
