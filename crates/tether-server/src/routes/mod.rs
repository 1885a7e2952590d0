//! HTTP route handlers.

pub mod auth;
pub mod health;

pub use auth::{LogoutResponse, SessionResponse, logout_handler, session_handler};
pub use health::{HealthResponse, health, health_routes};
