//! Throttled write-back of session activity to the durable store.
//!
//! Activity updates land in a pending map (latest value wins per subject) and
//! reach the store in one batch per flush, either on a fixed interval or on
//! demand. Creation and deletion bypass this queue and write through.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::record::SessionRecord;
use crate::store::{SharedStore, WriteBatch};

/// Handle to the running periodic flush task.
#[derive(Debug)]
struct PeriodicFlush {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Batches per-subject session writes and commits them to the store.
#[derive(Debug)]
pub struct DurableWriteSynchronizer {
    store: SharedStore,
    pending: Mutex<HashMap<String, SessionRecord>>,
    /// Serialises flushes so two commits never race on the same snapshot.
    flush_lock: tokio::sync::Mutex<()>,
    timer: Mutex<Option<PeriodicFlush>>,
}

impl DurableWriteSynchronizer {
    /// Create a synchronizer writing to `store`.
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            pending: Mutex::new(HashMap::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            timer: Mutex::new(None),
        }
    }

    /// Queue the latest record for a subject, replacing any queued value.
    pub fn queue_write(&self, subject_id: &str, record: SessionRecord) {
        self.pending.lock().insert(subject_id.to_string(), record);
    }

    /// Drop a queued write. Returns whether one was pending.
    pub fn discard(&self, subject_id: &str) -> bool {
        self.pending.lock().remove(subject_id).is_some()
    }

    /// Queued record for a subject, if any.
    pub fn pending(&self, subject_id: &str) -> Option<SessionRecord> {
        self.pending.lock().get(subject_id).cloned()
    }

    /// Number of subjects with a queued write.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Commit every queued write as one batch.
    ///
    /// The queue is cleared only after the commit succeeds; on failure it is
    /// left intact so the next flush resends the same data. A subject that was
    /// re-queued while the commit was in flight keeps its newer record.
    ///
    /// Returns the number of records committed.
    pub async fn flush(&self) -> StoreResult<usize> {
        let _flushing = self.flush_lock.lock().await;

        let snapshot: Vec<(String, SessionRecord)> = self
            .pending
            .lock()
            .iter()
            .map(|(subject, record)| (subject.clone(), record.clone()))
            .collect();

        if snapshot.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        for (_, record) in &snapshot {
            batch.put(record)?;
        }
        self.store.commit(batch).await?;

        let mut pending = self.pending.lock();
        for (subject, record) in &snapshot {
            if pending.get(subject) == Some(record) {
                pending.remove(subject);
            }
        }

        debug!(
            committed = snapshot.len(),
            pending = pending.len(),
            "Flushed session activity"
        );
        Ok(snapshot.len())
    }

    /// Start flushing every `interval`.
    ///
    /// Returns `false` without starting anything if a timer is already running
    /// (at most one per instance) or the interval is zero.
    pub fn start_periodic_flush(self: &Arc<Self>, interval: Duration) -> bool {
        if interval.is_zero() {
            warn!("Refusing to start periodic flush with a zero interval");
            return false;
        }

        let mut timer = self.timer.lock();
        if timer.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_periodic(
            Arc::downgrade(self),
            interval,
            cancel.clone(),
        ));
        *timer = Some(PeriodicFlush { cancel, handle });

        info!(interval_ms = interval.as_millis() as u64, "Periodic flush started");
        true
    }

    /// Stop the periodic flush. Returns whether one was running.
    pub fn stop_periodic_flush(&self) -> bool {
        match self.timer.lock().take() {
            Some(timer) => {
                timer.cancel.cancel();
                drop(timer.handle);
                info!("Periodic flush stopped");
                true
            }
            None => false,
        }
    }

    /// Check if the periodic flush is running.
    pub fn is_periodic_flush_running(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.handle.is_finished())
    }

    /// Stop the timer and flush whatever is still queued.
    pub async fn shutdown(&self) -> StoreResult<usize> {
        self.stop_periodic_flush();
        self.flush().await
    }
}

impl Drop for DurableWriteSynchronizer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.cancel.cancel();
        }
    }
}

async fn run_periodic(
    sync: Weak<DurableWriteSynchronizer>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(sync) = sync.upgrade() else { break };
        if let Err(e) = sync.flush().await {
            warn!(
                error = %e,
                pending = sync.pending_len(),
                "Periodic flush failed, will retry on next tick"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Collection, DocumentStore, MemoryStore};
    use chrono::Utc;

    fn setup() -> (Arc<MemoryStore>, Arc<DurableWriteSynchronizer>) {
        let store = Arc::new(MemoryStore::new());
        let sync = Arc::new(DurableWriteSynchronizer::new(store.clone()));
        (store, sync)
    }

    async fn stored(store: &MemoryStore, record: &SessionRecord) -> Option<SessionRecord> {
        store
            .get(Collection::Sessions, &record.session_id)
            .await
            .unwrap()
            .map(|body| serde_json::from_value(body).unwrap())
    }

    #[tokio::test]
    async fn test_latest_write_wins() {
        let (store, sync) = setup();
        let now = Utc::now();
        let first = SessionRecord::new("alice", now, chrono::Duration::seconds(60));
        let mut second = first.clone();
        second.extend(now + chrono::Duration::seconds(5), chrono::Duration::seconds(60));

        sync.queue_write("alice", first);
        sync.queue_write("alice", second.clone());
        assert_eq!(sync.pending_len(), 1);

        assert_eq!(sync.flush().await.unwrap(), 1);
        assert_eq!(store.commit_count(), 1);
        assert_eq!(store.count(Collection::Sessions), 1);
        assert_eq!(stored(&store, &second).await, Some(second));
        assert_eq!(sync.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_flush_empty_queue_skips_commit() {
        let (store, sync) = setup();
        assert_eq!(sync.flush().await.unwrap(), 0);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_queue() {
        let (store, sync) = setup();
        let record = SessionRecord::new("alice", Utc::now(), chrono::Duration::seconds(60));
        sync.queue_write("alice", record.clone());

        store.set_available(false);
        let err = sync.flush().await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(sync.pending("alice"), Some(record.clone()));

        store.set_available(true);
        assert_eq!(sync.flush().await.unwrap(), 1);
        assert_eq!(stored(&store, &record).await, Some(record));
        assert_eq!(sync.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_discard_drops_pending_write() {
        let (store, sync) = setup();
        let record = SessionRecord::new("alice", Utc::now(), chrono::Duration::seconds(60));
        sync.queue_write("alice", record);

        assert!(sync.discard("alice"));
        assert!(!sync.discard("alice"));
        assert_eq!(sync.flush().await.unwrap(), 0);
        assert_eq!(store.count(Collection::Sessions), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_single_timer() {
        let (store, sync) = setup();
        let interval = Duration::from_secs(10);

        assert!(sync.start_periodic_flush(interval));
        assert!(!sync.start_periodic_flush(interval));
        assert!(sync.is_periodic_flush_running());

        let record = SessionRecord::new("alice", Utc::now(), chrono::Duration::seconds(60));
        sync.queue_write("alice", record.clone());

        tokio::time::sleep(interval + Duration::from_millis(10)).await;
        assert_eq!(stored(&store, &record).await, Some(record));
        assert_eq!(store.commit_count(), 1);

        assert!(sync.stop_periodic_flush());
        assert!(!sync.stop_periodic_flush());

        let later = SessionRecord::new("bob", Utc::now(), chrono::Duration::seconds(60));
        sync.queue_write("bob", later);
        tokio::time::sleep(interval * 3).await;
        assert_eq!(store.commit_count(), 1);
        assert_eq!(sync.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_survives_failures() {
        let (store, sync) = setup();
        let interval = Duration::from_secs(5);
        let record = SessionRecord::new("alice", Utc::now(), chrono::Duration::seconds(60));
        sync.queue_write("alice", record.clone());

        store.set_available(false);
        sync.start_periodic_flush(interval);
        tokio::time::sleep(interval * 2 + Duration::from_millis(10)).await;
        assert_eq!(sync.pending_len(), 1);

        store.set_available(true);
        tokio::time::sleep(interval).await;
        assert_eq!(sync.pending_len(), 0);
        assert_eq!(stored(&store, &record).await, Some(record));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remaining() {
        let (store, sync) = setup();
        sync.start_periodic_flush(Duration::from_secs(3600));
        sync.queue_write(
            "alice",
            SessionRecord::new("alice", Utc::now(), chrono::Duration::seconds(60)),
        );

        assert_eq!(sync.shutdown().await.unwrap(), 1);
        assert!(!sync.is_periodic_flush_running());
        assert_eq!(store.count(Collection::Sessions), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let (_, sync) = setup();
        assert!(!sync.start_periodic_flush(Duration::ZERO));
        assert!(!sync.is_periodic_flush_running());
    }
}
