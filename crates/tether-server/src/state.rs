//! Application state shared across handlers.

use std::sync::Arc;

use tether_session::SessionEngine;

use crate::config::ServerConfig;
use crate::verify::Verifier;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session validity engine.
    pub engine: Arc<SessionEngine>,

    /// Bearer credential verifier.
    pub verifier: Arc<dyn Verifier>,

    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(engine: Arc<SessionEngine>, verifier: Arc<dyn Verifier>, config: ServerConfig) -> Self {
        Self {
            engine,
            verifier,
            config: Arc::new(config),
        }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
