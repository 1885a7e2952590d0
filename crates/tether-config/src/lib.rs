//! Configuration for tether.
//!
//! Provides TOML-based configuration with:
//! - Engine timing (`[session]`, `[sync]`, `[ledger]`, `[maintenance]`)
//! - HTTP server settings and the credential secret (`[server]`)
//! - Storage and logging locations (`[storage]`, `[logging]`)
//! - Config file layering (user config dir + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    CONFIG_DIR_ENV, JWT_SECRET_ENV, ConfigSource, LoadedConfig, load_config, load_config_file,
    load_config_with_options, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
