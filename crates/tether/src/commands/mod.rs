//! CLI command handlers.

pub mod config;
pub mod logout;
pub mod serve;
pub mod session;
pub mod status;
pub mod token;

use anyhow::Result;
use tether_client::TetherClient;
use tether_config::LoadedConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Server URL to connect to.
    pub server_url: String,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Merged configuration.
    pub config: LoadedConfig,
}

impl Context {
    /// Client for the configured server, optionally carrying a credential.
    pub fn client(&self, token: Option<&str>) -> Result<TetherClient> {
        let mut builder = TetherClient::builder().base_url(&self.server_url);
        if let Some(token) = token {
            builder = builder.auth_token(token);
        }
        Ok(builder.build()?)
    }
}
