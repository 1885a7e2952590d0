//! Configuration for the session engine.

use std::time::Duration;

/// Default inactivity window before a session expires (30 minutes).
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default retention for logout-ledger records (7 days).
///
/// Should exceed the verifier's maximum credential lifetime; pruning a record
/// earlier reopens the replay window for credentials issued before that logout.
pub const DEFAULT_LEDGER_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default interval between durable write-back flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Default timeout applied to each durable-store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between maintenance passes.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Configuration for the session engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a session survives without activity.
    pub inactivity_timeout: Duration,

    /// Retention of logout records before they may be pruned.
    pub ledger_ttl: Duration,

    /// Interval of the periodic write-back flush.
    pub flush_interval: Duration,

    /// Timeout applied to every durable-store call made by the engine.
    pub store_timeout: Duration,

    /// Interval for maintenance (expired-session cleanup, ledger pruning).
    pub cleanup_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            ledger_ttl: DEFAULT_LEDGER_TTL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inactivity timeout.
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// Set the logout-ledger retention.
    pub fn with_ledger_ttl(mut self, ttl: Duration) -> Self {
        self.ledger_ttl = ttl;
        self
    }

    /// Set the write-back flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the per-call store timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set the maintenance interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Inactivity timeout as a chrono duration, saturating on overflow.
    pub(crate) fn inactivity_window(&self) -> chrono::Duration {
        to_chrono(self.inactivity_timeout)
    }

    /// Ledger retention as a chrono duration, saturating on overflow.
    pub(crate) fn ledger_window(&self) -> chrono::Duration {
        to_chrono(self.ledger_ttl)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
