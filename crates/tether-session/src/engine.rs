//! Session validity state machine.
//!
//! [`SessionEngine`] owns the activity cache, the write-back synchronizer and
//! the revocation ledger, and decides for every request whether the subject's
//! session is alive, must be created, or must be refused.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, trace, warn};

use crate::cache::ActivityCache;
use crate::clock::{SharedClock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{Result, SessionError, StoreResult};
use crate::ledger::RevocationLedger;
use crate::record::{SUBJECT_FIELD, SessionRecord, SessionStatus};
use crate::store::{Collection, Filter, SharedStore, TimeoutStore, WriteBatch};
use crate::sync::DurableWriteSynchronizer;

/// Result of looking a subject's session up.
#[derive(Debug, Clone, PartialEq)]
enum Lookup {
    Valid(SessionRecord),
    Expired,
    NotFound,
    Integrity,
}

impl Lookup {
    fn status(&self) -> SessionStatus {
        match self {
            Lookup::Valid(_) => SessionStatus::Valid,
            Lookup::Expired => SessionStatus::Expired,
            Lookup::NotFound => SessionStatus::NotFound,
            Lookup::Integrity => SessionStatus::DataIntegrityError,
        }
    }
}

type SubjectLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive hold on one subject's creation/clear lock.
///
/// Removes the map entry on drop when nobody else is waiting for it.
struct SubjectGuard<'a> {
    locks: &'a SubjectLocks,
    subject_id: String,
    guard: OwnedMutexGuard<()>,
}

impl Drop for SubjectGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // Only the map and this guard hold the lock.
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) == 2 {
            locks.remove(&self.subject_id);
        }
    }
}

/// Session validity engine.
///
/// Store calls are bounded by [`EngineConfig::store_timeout`]. Cache hits
/// never touch the store.
#[derive(Debug)]
pub struct SessionEngine {
    config: EngineConfig,
    clock: SharedClock,
    store: SharedStore,
    cache: ActivityCache,
    sync: Arc<DurableWriteSynchronizer>,
    ledger: RevocationLedger,
    subject_locks: SubjectLocks,
}

impl SessionEngine {
    /// Create an engine on `store` using the system clock.
    pub fn new(store: SharedStore, config: EngineConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    /// Create an engine reading time from `clock`.
    pub fn with_clock(store: SharedStore, clock: SharedClock, config: EngineConfig) -> Self {
        let store: SharedStore = Arc::new(TimeoutStore::new(store, config.store_timeout));
        Self {
            cache: ActivityCache::new(clock.clone()),
            sync: Arc::new(DurableWriteSynchronizer::new(store.clone())),
            ledger: RevocationLedger::new(store.clone(), clock.clone(), config.ledger_window()),
            subject_locks: Mutex::new(HashMap::new()),
            config,
            clock,
            store,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The in-memory activity cache.
    pub fn cache(&self) -> &ActivityCache {
        &self.cache
    }

    /// The write-back synchronizer.
    pub fn synchronizer(&self) -> &Arc<DurableWriteSynchronizer> {
        &self.sync
    }

    /// The revocation ledger.
    pub fn ledger(&self) -> &RevocationLedger {
        &self.ledger
    }

    /// Current time according to the engine's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Start the periodic write-back flush on the configured interval.
    ///
    /// Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        self.sync.start_periodic_flush(self.config.flush_interval)
    }

    /// Classify the subject's session.
    ///
    /// Store failures surface as errors, never as [`SessionStatus::NotFound`].
    pub async fn validate(&self, subject_id: &str) -> Result<SessionStatus> {
        Ok(self.lookup(subject_id).await?.status())
    }

    /// The subject's live session, if any.
    pub async fn session(&self, subject_id: &str) -> Result<Option<SessionRecord>> {
        match self.lookup(subject_id).await? {
            Lookup::Valid(record) => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    /// Make sure the subject has a live session, creating one if needed.
    ///
    /// Returns `true` when a session was created. Refuses credentials issued
    /// before the subject's last logout with [`SessionError::Revoked`], and
    /// never recreates a session that timed out: that yields
    /// [`SessionError::Expired`] and retires the old session.
    pub async fn ensure_session(
        &self,
        subject_id: &str,
        issued_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        if let Some(issued_at) = issued_at {
            self.check_revocation(subject_id, issued_at).await?;
        }

        if let Some(Lookup::Valid(_)) = self.lookup_cached(subject_id) {
            return Ok(false);
        }

        let _guard = self.lock_subject(subject_id).await;
        match self.lookup_durable(subject_id).await? {
            Lookup::Valid(_) => Ok(false),
            Lookup::Expired => {
                self.retire(subject_id).await;
                Err(SessionError::Expired {
                    subject_id: subject_id.to_string(),
                })
            }
            Lookup::NotFound | Lookup::Integrity => {
                self.create(subject_id).await?;
                Ok(true)
            }
        }
    }

    /// Record activity for a live session.
    ///
    /// The cache is extended immediately and the durable write is queued.
    /// Failures are logged and swallowed.
    pub async fn update_last_activity(&self, subject_id: &str) {
        match self.validate(subject_id).await {
            Ok(SessionStatus::Valid) => {}
            Ok(status) => {
                debug!(subject_id, ?status, "Skipping activity update");
                return;
            }
            Err(e) => {
                warn!(subject_id, error = %e, "Activity update skipped, session lookup failed");
                return;
            }
        }

        match self.cache.extend(subject_id, self.config.inactivity_window()) {
            Some(record) => {
                trace!(subject_id, expires_at = %record.expires_at, "Session extended");
                self.sync.queue_write(subject_id, record);
            }
            None => debug!(subject_id, "Session cleared before activity update"),
        }
    }

    /// Log the subject out: revoke earlier credentials and drop the session.
    ///
    /// A failed ledger write is reported as a priority alert and the session
    /// is deleted anyway. Fails only when the durable delete fails. Clearing
    /// an already-cleared subject is a no-op beyond refreshing the logout time.
    pub async fn clear_session(&self, subject_id: &str) -> Result<()> {
        let _guard = self.lock_subject(subject_id).await;

        self.cache.clear(subject_id);
        self.sync.discard(subject_id);

        if let Err(e) = self.ledger.record_logout(subject_id).await {
            error!(
                subject_id,
                error = %e,
                alert = true,
                "Failed to persist logout, earlier credentials are only revoked in this process"
            );
        }

        let removed = self.delete_documents(subject_id).await?;
        info!(subject_id, removed, "Session cleared");
        Ok(())
    }

    /// True when `issued_at` predates the subject's most recent logout.
    pub async fn was_issued_before_logout(
        &self,
        subject_id: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.ledger.was_issued_before_logout(subject_id, issued_at).await?)
    }

    /// Stop the periodic flush and persist every queued write.
    pub async fn shutdown(&self) -> Result<usize> {
        let flushed = self.sync.shutdown().await?;
        info!(flushed, "Session engine shut down");
        Ok(flushed)
    }

    async fn check_revocation(&self, subject_id: &str, issued_at: DateTime<Utc>) -> Result<()> {
        match self.ledger.logged_out_at(subject_id).await? {
            Some(logged_out_at) if issued_at < logged_out_at => {
                debug!(subject_id, %issued_at, %logged_out_at, "Credential predates logout");
                Err(SessionError::Revoked {
                    subject_id: subject_id.to_string(),
                    logged_out_at,
                })
            }
            _ => Ok(()),
        }
    }

    async fn lookup(&self, subject_id: &str) -> Result<Lookup> {
        if let Some(hit) = self.lookup_cached(subject_id) {
            return Ok(hit);
        }
        let _guard = self.lock_subject(subject_id).await;
        self.lookup_durable(subject_id).await
    }

    /// Cache-only classification. `None` means the store must be consulted.
    fn lookup_cached(&self, subject_id: &str) -> Option<Lookup> {
        let cached = self.cache.get(subject_id)?;
        if cached.subject_id != subject_id {
            warn!(
                subject_id,
                cached_subject = %cached.subject_id,
                "Cached session names a different subject, purging"
            );
            self.cache.clear(subject_id);
            return Some(Lookup::Integrity);
        }
        if cached.is_expired_at(self.clock.now()) {
            return None;
        }
        Some(Lookup::Valid(cached))
    }

    /// Durable classification. The caller holds the subject lock.
    async fn lookup_durable(&self, subject_id: &str) -> Result<Lookup> {
        // Another holder of the lock may have created or backfilled meanwhile.
        if let Some(hit) = self.lookup_cached(subject_id) {
            return Ok(hit);
        }

        let docs = self
            .store
            .find(Collection::Sessions, Filter::field_eq(SUBJECT_FIELD, subject_id))
            .await?;

        let mut latest: Option<SessionRecord> = None;
        for doc in &docs {
            let record = match doc.decode::<SessionRecord>() {
                Ok(record) => record,
                Err(e) => {
                    warn!(subject_id, key = %doc.key, error = %e, "Undecodable session document");
                    return Ok(Lookup::Integrity);
                }
            };
            if record.subject_id != subject_id || record.session_id != doc.key {
                warn!(
                    subject_id,
                    key = %doc.key,
                    stored_subject = %record.subject_id,
                    "Session document does not match its lookup"
                );
                return Ok(Lookup::Integrity);
            }
            if latest
                .as_ref()
                .is_none_or(|l| record.last_activity_at > l.last_activity_at)
            {
                latest = Some(record);
            }
        }

        let Some(record) = latest else {
            return Ok(Lookup::NotFound);
        };

        // A document that outlived a logout (failed delete, late flush) is dead.
        if let Some(logged_out_at) = self.ledger.logged_out_at(subject_id).await?
            && record.created_at < logged_out_at
        {
            debug!(
                subject_id,
                session_id = %record.session_id,
                "Session document predates logout, ignoring"
            );
            return Ok(Lookup::NotFound);
        }

        if record.is_expired_at(self.clock.now()) {
            debug!(subject_id, session_id = %record.session_id, "Session expired");
            return Ok(Lookup::Expired);
        }

        trace!(subject_id, session_id = %record.session_id, "Cache backfilled from store");
        self.cache.set(subject_id, record.clone());
        Ok(Lookup::Valid(record))
    }

    /// Write a fresh session through to the store and cache, replacing any
    /// documents left for the subject.
    async fn create(&self, subject_id: &str) -> Result<SessionRecord> {
        let record = SessionRecord::new(
            subject_id,
            self.clock.now(),
            self.config.inactivity_window(),
        );

        let stale = self
            .store
            .find(Collection::Sessions, Filter::field_eq(SUBJECT_FIELD, subject_id))
            .await?;
        let mut batch = WriteBatch::new();
        for doc in &stale {
            batch.delete(Collection::Sessions, doc.key.clone());
        }
        batch.put(&record)?;
        self.store.commit(batch).await?;

        self.sync.discard(subject_id);
        self.cache.set(subject_id, record.clone());
        info!(
            subject_id,
            session_id = %record.session_id,
            replaced = stale.len(),
            "Session created"
        );
        Ok(record)
    }

    /// Drop a timed-out session so the same credential cannot revive it.
    async fn retire(&self, subject_id: &str) {
        self.cache.clear(subject_id);
        self.sync.discard(subject_id);

        if let Err(e) = self.ledger.record_logout(subject_id).await {
            error!(
                subject_id,
                error = %e,
                alert = true,
                "Failed to persist logout for expired session"
            );
        }
        match self.delete_documents(subject_id).await {
            Ok(removed) => info!(subject_id, removed, "Expired session retired"),
            Err(e) => warn!(subject_id, error = %e, "Failed to delete expired session"),
        }
    }

    /// Retire a subject whose durable session timed out while it was idle.
    ///
    /// Records a logout unless one already covers every document, so the
    /// credential that opened the session cannot start a new one. Returns
    /// the number of documents removed; zero when the subject is still live.
    pub(crate) async fn retire_idle(&self, subject_id: &str) -> Result<usize> {
        let _guard = self.lock_subject(subject_id).await;
        let now = self.clock.now();

        let queued_live = self
            .sync
            .pending(subject_id)
            .is_some_and(|record| !record.is_expired_at(now));
        if !self.cache.is_expired(subject_id) || queued_live {
            return Ok(0);
        }

        let records: Vec<SessionRecord> = self
            .store
            .find(Collection::Sessions, Filter::field_eq(SUBJECT_FIELD, subject_id))
            .await?
            .iter()
            .filter_map(|doc| doc.decode::<SessionRecord>().ok())
            .collect();
        if records.iter().any(|record| !record.is_expired_at(now)) {
            return Ok(0);
        }

        let already_revoked = match self.ledger.logged_out_at(subject_id).await? {
            Some(logged_out_at) => records.iter().all(|record| record.created_at < logged_out_at),
            None => false,
        };
        if !already_revoked {
            self.ledger.record_logout(subject_id).await?;
        }

        self.cache.clear(subject_id);
        self.sync.discard(subject_id);
        let removed = self.delete_documents(subject_id).await?;
        info!(subject_id, removed, "Idle session retired");
        Ok(removed)
    }

    async fn delete_documents(&self, subject_id: &str) -> StoreResult<usize> {
        let docs = self
            .store
            .find(Collection::Sessions, Filter::field_eq(SUBJECT_FIELD, subject_id))
            .await?;
        if docs.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        for doc in &docs {
            batch.delete(Collection::Sessions, doc.key.clone());
        }
        self.store.commit(batch).await?;
        Ok(docs.len())
    }

    async fn lock_subject(&self, subject_id: &str) -> SubjectGuard<'_> {
        let lock = self
            .subject_locks
            .lock()
            .entry(subject_id.to_string())
            .or_default()
            .clone();
        SubjectGuard {
            locks: &self.subject_locks,
            subject_id: subject_id.to_string(),
            guard: lock.lock_owned().await,
        }
    }

    /// Drop lock entries abandoned by cancelled waiters.
    pub(crate) fn prune_subject_locks(&self) -> usize {
        let mut locks = self.subject_locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    #[cfg(test)]
    fn subject_lock_count(&self) -> usize {
        self.subject_locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::{DocumentStore, MemoryStore};
    use chrono::Duration;
    use serde_json::json;

    fn setup() -> (Arc<MemoryStore>, ManualClock, Arc<SessionEngine>) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::default();
        let config =
            EngineConfig::new().with_inactivity_timeout(std::time::Duration::from_secs(60));
        let engine = Arc::new(SessionEngine::with_clock(
            store.clone(),
            Arc::new(clock.clone()),
            config,
        ));
        (store, clock, engine)
    }

    #[tokio::test]
    async fn test_unknown_subject_not_found() {
        let (_, _, engine) = setup();
        assert_eq!(engine.validate("alice").await.unwrap(), SessionStatus::NotFound);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_store() {
        let (store, _, engine) = setup();
        assert!(engine.ensure_session("alice", None).await.unwrap());

        store.set_available(false);
        assert_eq!(engine.validate("alice").await.unwrap(), SessionStatus::Valid);
        assert!(!engine.ensure_session("alice", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_poisoned_cache_entry_is_purged() {
        let (_, clock, engine) = setup();
        let foreign = SessionRecord::new("mallory", clock.now(), Duration::seconds(60));
        engine.cache().set("alice", foreign);

        assert_eq!(
            engine.validate("alice").await.unwrap(),
            SessionStatus::DataIntegrityError
        );
        assert!(engine.cache().get("alice").is_none());
    }

    #[tokio::test]
    async fn test_mismatched_document_is_integrity_error() {
        let (store, clock, engine) = setup();
        let mut record = SessionRecord::new("alice", clock.now(), Duration::seconds(60));
        record.session_id = "other-key".to_string();
        store
            .set(Collection::Sessions, "k1", serde_json::to_value(&record).unwrap())
            .await
            .unwrap();

        assert_eq!(
            engine.validate("alice").await.unwrap(),
            SessionStatus::DataIntegrityError
        );

        // Creation replaces the bad document.
        assert!(engine.ensure_session("alice", None).await.unwrap());
        assert_eq!(store.count(Collection::Sessions), 1);
        assert!(store.get(Collection::Sessions, "k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undecodable_document_is_integrity_error() {
        let (store, _, engine) = setup();
        store
            .set(
                Collection::Sessions,
                "k1",
                json!({ "subject_id": "alice", "expires_at": "soon" }),
            )
            .await
            .unwrap();

        assert_eq!(
            engine.validate("alice").await.unwrap(),
            SessionStatus::DataIntegrityError
        );
    }

    #[tokio::test]
    async fn test_update_last_activity_extends_and_queues() {
        let (store, clock, engine) = setup();
        engine.ensure_session("alice", None).await.unwrap();
        let created = engine.cache().get("alice").unwrap();
        let commits = store.commit_count();

        clock.advance(Duration::seconds(30));
        engine.update_last_activity("alice").await;

        let updated = engine.cache().get("alice").unwrap();
        assert_eq!(updated.last_activity_at, clock.now());
        assert_eq!(updated.expires_at, clock.now() + Duration::seconds(60));
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(engine.synchronizer().pending("alice"), Some(updated));
        assert_eq!(store.commit_count(), commits);
    }

    #[tokio::test]
    async fn test_update_last_activity_ignores_missing_session() {
        let (_, _, engine) = setup();
        engine.update_last_activity("alice").await;
        assert_eq!(engine.synchronizer().pending_len(), 0);
        assert!(engine.cache().is_empty());
    }

    #[tokio::test]
    async fn test_update_last_activity_swallows_store_errors() {
        let (store, _, engine) = setup();
        store.set_available(false);
        engine.update_last_activity("alice").await;
        assert_eq!(engine.synchronizer().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_expired_session_is_retired() {
        let (store, clock, engine) = setup();
        let issued = clock.now();
        engine.ensure_session("alice", Some(issued)).await.unwrap();
        engine.synchronizer().flush().await.unwrap();

        clock.advance(Duration::seconds(61));
        assert_eq!(engine.validate("alice").await.unwrap(), SessionStatus::Expired);

        let err = engine.ensure_session("alice", Some(issued)).await.unwrap_err();
        assert!(matches!(err, SessionError::Expired { .. }));
        assert_eq!(store.count(Collection::Sessions), 0);

        // The same credential cannot open a new session.
        let err = engine.ensure_session("alice", Some(issued)).await.unwrap_err();
        assert!(matches!(err, SessionError::Revoked { .. }));

        // A credential issued after re-authentication can.
        let fresh = clock.now() + Duration::milliseconds(1);
        assert!(engine.ensure_session("alice", Some(fresh)).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_session_discards_pending_write() {
        let (store, clock, engine) = setup();
        engine.ensure_session("alice", None).await.unwrap();
        clock.advance(Duration::seconds(1));
        engine.update_last_activity("alice").await;
        assert_eq!(engine.synchronizer().pending_len(), 1);

        engine.clear_session("alice").await.unwrap();
        assert_eq!(engine.synchronizer().pending_len(), 0);
        engine.synchronizer().flush().await.unwrap();
        assert_eq!(store.count(Collection::Sessions), 0);
        assert_eq!(engine.validate("alice").await.unwrap(), SessionStatus::NotFound);
    }

    #[tokio::test]
    async fn test_document_surviving_logout_is_ignored() {
        let (store, clock, engine) = setup();
        let old = SessionRecord::new("alice", clock.now(), Duration::seconds(60));
        clock.advance(Duration::seconds(1));
        engine.ledger().record_logout("alice").await.unwrap();
        store
            .set(Collection::Sessions, &old.session_id, serde_json::to_value(&old).unwrap())
            .await
            .unwrap();

        assert_eq!(engine.validate("alice").await.unwrap(), SessionStatus::NotFound);
        assert!(engine.cache().is_empty());
    }

    #[tokio::test]
    async fn test_clear_session_is_idempotent() {
        let (_, _, engine) = setup();
        engine.clear_session("alice").await.unwrap();
        engine.clear_session("alice").await.unwrap();
        assert_eq!(engine.validate("alice").await.unwrap(), SessionStatus::NotFound);
    }

    #[tokio::test]
    async fn test_concurrent_creation_writes_once() {
        let (store, _, engine) = setup();
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.ensure_session("alice", None).await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.commit_count(), 1);
        assert_eq!(store.count(Collection::Sessions), 1);
        assert_eq!(engine.subject_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_activity() {
        let (store, clock, engine) = setup();
        engine.ensure_session("alice", None).await.unwrap();
        clock.advance(Duration::seconds(10));
        engine.update_last_activity("alice").await;

        assert_eq!(engine.shutdown().await.unwrap(), 1);
        let record = engine.cache().get("alice").unwrap();
        let stored = store
            .get(Collection::Sessions, &record.session_id)
            .await
            .unwrap()
            .unwrap();
        let stored: SessionRecord = serde_json::from_value(stored).unwrap();
        assert_eq!(stored, record);
    }
}
