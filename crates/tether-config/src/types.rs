//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [session]       # inactivity window, store timeout
//! [sync]          # write-back flush interval
//! [ledger]        # logout record retention
//! [maintenance]   # cleanup cadence, cache warm-up
//! [server]        # bind address, request logging, credential secret
//! [storage]       # database location
//! [logging]       # log filter and file output
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_session::{
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_FLUSH_INTERVAL, DEFAULT_INACTIVITY_TIMEOUT,
    DEFAULT_LEDGER_TTL, DEFAULT_STORE_TIMEOUT, EngineConfig,
};

use crate::{ConfigError, Result};

/// Application name for directory resolution.
pub(crate) const APP_NAME: &str = "tether";

/// Database filename inside the data directory.
const DATABASE_FILE: &str = "tether.db";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub session: Option<SessionSection>,
    pub sync: Option<SyncSection>,
    pub ledger: Option<LedgerSection>,
    pub maintenance: Option<MaintenanceSection>,
    pub server: Option<ServerSection>,
    pub storage: Option<StorageSection>,
    pub logging: Option<LoggingSection>,
}

impl TetherConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, not merged field by field.
    pub fn merge(&mut self, other: TetherConfig) {
        if other.session.is_some() {
            self.session = other.session;
        }
        if other.sync.is_some() {
            self.sync = other.sync;
        }
        if other.ledger.is_some() {
            self.ledger = other.ledger;
        }
        if other.maintenance.is_some() {
            self.maintenance = other.maintenance;
        }
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Engine settings, with defaults for absent sections.
    ///
    /// Zero durations are rejected.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let session = self.session.clone().unwrap_or_default();
        let sync = self.sync.clone().unwrap_or_default();
        let ledger = self.ledger.clone().unwrap_or_default();
        let maintenance = self.maintenance.clone().unwrap_or_default();

        Ok(EngineConfig::new()
            .with_inactivity_timeout(non_zero(
                "session.inactivity_timeout_secs",
                Duration::from_secs(session.inactivity_timeout_secs),
            )?)
            .with_store_timeout(non_zero(
                "session.store_timeout_ms",
                Duration::from_millis(session.store_timeout_ms),
            )?)
            .with_flush_interval(non_zero(
                "sync.flush_interval_secs",
                Duration::from_secs(sync.flush_interval_secs),
            )?)
            .with_ledger_ttl(non_zero(
                "ledger.ttl_secs",
                Duration::from_secs(ledger.ttl_secs),
            )?)
            .with_cleanup_interval(non_zero(
                "maintenance.cleanup_interval_secs",
                Duration::from_secs(maintenance.cleanup_interval_secs),
            )?))
    }

    /// Server section, or its defaults.
    pub fn server(&self) -> ServerSection {
        self.server.clone().unwrap_or_default()
    }

    /// Maintenance section, or its defaults.
    pub fn maintenance(&self) -> MaintenanceSection {
        self.maintenance.clone().unwrap_or_default()
    }

    /// Logging section, or its defaults.
    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    /// Database file to open.
    ///
    /// Falls back to `<data dir>/tether/tether.db`.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = self.storage.as_ref().and_then(|s| s.database_path.clone()) {
            return Ok(path);
        }
        dirs::data_dir()
            .map(|d| d.join(APP_NAME).join(DATABASE_FILE))
            .ok_or_else(|| ConfigError::MissingField {
                field: "database_path".to_string(),
                context: "[storage] (no platform data directory)".to_string(),
            })
    }

    /// Credential secret, required to run the server.
    pub fn jwt_secret(&self) -> Result<&str> {
        self.server
            .as_ref()
            .and_then(|s| s.jwt_secret.as_deref())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingField {
                field: "jwt_secret".to_string(),
                context: "[server]".to_string(),
            })
    }
}

fn non_zero(field: &str, value: Duration) -> Result<Duration> {
    if value.is_zero() {
        return Err(ConfigError::Invalid {
            field: field.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine Sections
// ─────────────────────────────────────────────────────────────────────────────

/// Session window settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Seconds without activity before a session expires.
    pub inactivity_timeout_secs: u64,
    /// Timeout for each durable-store call, in milliseconds.
    pub store_timeout_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: DEFAULT_INACTIVITY_TIMEOUT.as_secs(),
            store_timeout_ms: millis(DEFAULT_STORE_TIMEOUT),
        }
    }
}

/// Write-back settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub flush_interval_secs: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL.as_secs(),
        }
    }
}

/// Logout ledger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    /// Retention of logout records. Keep above the longest credential lifetime.
    pub ttl_secs: u64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_LEDGER_TTL.as_secs(),
        }
    }
}

/// Background maintenance settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    pub cleanup_interval_secs: u64,
    /// Load live sessions into the cache at startup.
    pub warm_cache_on_start: bool,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL.as_secs(),
            warm_cache_on_start: true,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to bind to.
    pub bind_address: SocketAddr,
    /// Enable request logging.
    pub request_logging: bool,
    /// HS256 secret for bearer credentials.
    pub jwt_secret: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            request_logging: true,
            jwt_secret: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage / Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// SQLite database file.
    pub database_path: Option<PathBuf>,
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for daily JSON log files. Disabled when absent.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_engine_defaults() {
        let config = TetherConfig::from_toml("").unwrap();
        assert_eq!(config, TetherConfig::new());

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.inactivity_timeout, DEFAULT_INACTIVITY_TIMEOUT);
        assert_eq!(engine.store_timeout, DEFAULT_STORE_TIMEOUT);
        assert_eq!(engine.flush_interval, DEFAULT_FLUSH_INTERVAL);
        assert_eq!(engine.ledger_ttl, DEFAULT_LEDGER_TTL);
        assert_eq!(engine.cleanup_interval, DEFAULT_CLEANUP_INTERVAL);
        assert!(config.maintenance().warm_cache_on_start);
    }

    #[test]
    fn test_parse_full() {
        let config = TetherConfig::from_toml(
            r#"
[session]
inactivity_timeout_secs = 600
store_timeout_ms = 250

[sync]
flush_interval_secs = 10

[ledger]
ttl_secs = 86400

[maintenance]
cleanup_interval_secs = 120
warm_cache_on_start = false

[server]
bind_address = "0.0.0.0:9000"
request_logging = false
jwt_secret = "s3cret"

[storage]
database_path = "/var/lib/tether/sessions.db"

[logging]
filter = "tether=debug"
directory = "/var/log/tether"
"#,
        )
        .unwrap();

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.inactivity_timeout, Duration::from_secs(600));
        assert_eq!(engine.store_timeout, Duration::from_millis(250));
        assert_eq!(engine.flush_interval, Duration::from_secs(10));
        assert_eq!(engine.ledger_ttl, Duration::from_secs(86400));
        assert_eq!(engine.cleanup_interval, Duration::from_secs(120));

        let server = config.server();
        assert_eq!(server.bind_address.port(), 9000);
        assert!(!server.request_logging);
        assert_eq!(config.jwt_secret().unwrap(), "s3cret");
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/var/lib/tether/sessions.db")
        );
        assert_eq!(config.logging().filter, "tether=debug");
        assert!(!config.maintenance().warm_cache_on_start);
    }

    #[test]
    fn test_partial_section_keeps_field_defaults() {
        let config = TetherConfig::from_toml("[session]\ninactivity_timeout_secs = 60\n").unwrap();
        let engine = config.engine_config().unwrap();
        assert_eq!(engine.inactivity_timeout, Duration::from_secs(60));
        assert_eq!(engine.store_timeout, DEFAULT_STORE_TIMEOUT);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = TetherConfig::from_toml("[sync]\nflush_interval_secs = 0\n").unwrap();
        let err = config.engine_config().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "sync.flush_interval_secs"));
    }

    #[test]
    fn test_missing_secret() {
        let config = TetherConfig::from_toml("[server]\nrequest_logging = true\n").unwrap();
        assert!(matches!(
            config.jwt_secret().unwrap_err(),
            ConfigError::MissingField { .. }
        ));
    }

    #[test]
    fn test_bad_bind_address() {
        assert!(TetherConfig::from_toml("[server]\nbind_address = \"nowhere\"\n").is_err());
    }

    #[test]
    fn test_merge_override() {
        let mut base = TetherConfig::from_toml(
            "[session]\ninactivity_timeout_secs = 60\n[sync]\nflush_interval_secs = 5\n",
        )
        .unwrap();
        let overlay = TetherConfig::from_toml("[session]\ninactivity_timeout_secs = 90\n").unwrap();
        base.merge(overlay);

        let engine = base.engine_config().unwrap();
        assert_eq!(engine.inactivity_timeout, Duration::from_secs(90));
        assert_eq!(engine.flush_interval, Duration::from_secs(5));
    }
}
