//! Session-validity engine.
//!
//! This crate decides, on every request, whether a subject's session is alive:
//! - [`ActivityCache`] holds hot session records in memory
//! - [`DurableWriteSynchronizer`] batches activity write-back to the store
//! - [`RevocationLedger`] records each subject's last logout
//! - [`SessionEngine`] ties them together into the validation state machine
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_session::{EngineConfig, SessionEngine, SqliteStore};
//!
//! let store = Arc::new(SqliteStore::open(&path)?);
//! let engine = SessionEngine::new(store, EngineConfig::default());
//! engine.start();
//!
//! let created = engine.ensure_session("user-1", Some(issued_at)).await?;
//! engine.update_last_activity("user-1").await;
//! engine.clear_session("user-1").await?;
//! ```

mod cache;
pub mod clock;
mod config;
mod engine;
mod error;
mod ledger;
mod maintenance;
mod record;
pub mod store;
mod sync;

pub use cache::ActivityCache;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_FLUSH_INTERVAL, DEFAULT_INACTIVITY_TIMEOUT,
    DEFAULT_LEDGER_TTL, DEFAULT_STORE_TIMEOUT, EngineConfig,
};
pub use engine::SessionEngine;
pub use error::{Result, SessionError, StoreError, StoreResult};
pub use ledger::{DEFAULT_MEMO_CAPACITY, RevocationLedger};
pub use maintenance::{MaintenanceReport, spawn_maintenance};
pub use record::{LogoutRecord, SUBJECT_FIELD, SessionRecord, SessionStatus, timestamp};
pub use store::{DocumentStore, MemoryStore, SharedStore, SqliteStore};
pub use sync::DurableWriteSynchronizer;
