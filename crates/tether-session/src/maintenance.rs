//! Off-hot-path housekeeping: cache warm-up, expired-session cleanup and
//! ledger pruning.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::SessionEngine;
use crate::error::Result;
use crate::record::SessionRecord;
use crate::store::{Collection, Filter, WriteBatch};

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Expired session documents deleted from the store.
    pub sessions_removed: usize,
    /// Expired entries swept from the activity cache.
    pub cache_swept: usize,
    /// Logout records past retention deleted from the store.
    pub logouts_pruned: usize,
}

impl SessionEngine {
    /// Load every unexpired durable session into the cache.
    ///
    /// Sessions that predate their subject's last logout are skipped, and a
    /// cached entry with newer activity is never overwritten. Returns the
    /// number of records loaded.
    pub async fn warm_cache(&self) -> Result<usize> {
        let now = self.now();
        let docs = self
            .store()
            .find(Collection::Sessions, Filter::ExpiresAfter(now))
            .await?;

        let mut latest: HashMap<String, SessionRecord> = HashMap::new();
        for doc in &docs {
            let record = match doc.decode::<SessionRecord>() {
                Ok(record) if record.session_id == doc.key => record,
                Ok(_) => {
                    warn!(key = %doc.key, "Session document key mismatch, skipping warm-up");
                    continue;
                }
                Err(e) => {
                    warn!(key = %doc.key, error = %e, "Undecodable session document, skipping warm-up");
                    continue;
                }
            };
            match latest.get(&record.subject_id) {
                Some(seen) if seen.last_activity_at >= record.last_activity_at => {}
                _ => {
                    latest.insert(record.subject_id.clone(), record);
                }
            }
        }

        let mut loaded = 0;
        for (subject_id, record) in latest {
            if let Some(logged_out_at) = self.ledger().logged_out_at(&subject_id).await?
                && record.created_at < logged_out_at
            {
                continue;
            }
            let newer_cached = self
                .cache()
                .get(&subject_id)
                .is_some_and(|cached| cached.last_activity_at >= record.last_activity_at);
            if !newer_cached {
                self.cache().set(&subject_id, record);
                loaded += 1;
            }
        }

        info!(loaded, scanned = docs.len(), "Activity cache warmed");
        Ok(loaded)
    }

    /// Retire expired durable sessions and sweep the cache.
    ///
    /// Each idle subject is retired exactly as an expired lookup would be:
    /// a logout is recorded before its documents go, so the credential that
    /// opened the session cannot quietly open another. A subject whose cached
    /// or queued record is still live keeps its document, since the store
    /// merely lags behind the cache.
    pub async fn cleanup_expired(&self) -> Result<MaintenanceReport> {
        let now = self.now();
        let docs = self
            .store()
            .find(Collection::Sessions, Filter::ExpiresAtOrBefore(now))
            .await?;
        let cache_swept = self.cache().clear_expired();

        let mut subjects = BTreeSet::new();
        let mut undecodable = WriteBatch::new();
        for doc in &docs {
            match doc.decode::<SessionRecord>() {
                Ok(record) => {
                    subjects.insert(record.subject_id);
                }
                Err(e) => {
                    warn!(key = %doc.key, error = %e, "Undecodable expired session document, deleting");
                    undecodable.delete(Collection::Sessions, doc.key.clone());
                }
            }
        }

        let mut sessions_removed = undecodable.len();
        if !undecodable.is_empty() {
            self.store().commit(undecodable).await?;
        }
        for subject_id in &subjects {
            sessions_removed += self.retire_idle(subject_id).await?;
        }
        let locks_pruned = self.prune_subject_locks();

        debug!(sessions_removed, cache_swept, locks_pruned, "Expired sessions cleaned up");
        Ok(MaintenanceReport {
            sessions_removed,
            cache_swept,
            logouts_pruned: 0,
        })
    }

    /// Delete logout records past their retention.
    pub async fn prune_ledger(&self) -> Result<usize> {
        Ok(self.ledger().prune().await?)
    }

    /// One full maintenance pass.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let mut report = self.cleanup_expired().await?;
        report.logouts_pruned = self.prune_ledger().await?;
        info!(
            sessions_removed = report.sessions_removed,
            cache_swept = report.cache_swept,
            logouts_pruned = report.logouts_pruned,
            "Maintenance pass complete"
        );
        Ok(report)
    }
}

/// Run [`SessionEngine::run_maintenance`] every `cleanup_interval` until
/// `cancel` fires. Failed passes are logged and retried on the next tick.
pub fn spawn_maintenance(engine: Arc<SessionEngine>, cancel: CancellationToken) -> JoinHandle<()> {
    let interval = engine.config().cleanup_interval;
    tokio::spawn(async move {
        if interval.is_zero() {
            warn!("Maintenance disabled: zero cleanup interval");
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = engine.run_maintenance().await {
                warn!(error = %e, "Maintenance pass failed");
            }
        }
        debug!("Maintenance task stopped");
    })
}
