//! Durable "logged out at T" record per subject.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::error::{StoreError, StoreResult};
use crate::record::LogoutRecord;
use crate::store::{Collection, Filter, SharedStore, WriteBatch, decode};

/// Memo entries allowed before "no record" results stop being memoised.
pub const DEFAULT_MEMO_CAPACITY: usize = 10_000;

/// Revocation ledger backed by the `logouts` collection.
///
/// Reads go through a per-subject memo holding the last known logout time,
/// including the absence of one, so hot subjects are not re-read from the
/// store on every request. The memo is written before the store on logout;
/// a failed durable write therefore still revokes within this process.
///
/// Absence entries are bounded by the memo capacity and dropped on every
/// [`prune`](Self::prune). Logout entries live as long as their records.
#[derive(Debug)]
pub struct RevocationLedger {
    store: SharedStore,
    clock: SharedClock,
    ttl: Duration,
    memo: RwLock<HashMap<String, Option<DateTime<Utc>>>>,
    memo_capacity: usize,
}

impl RevocationLedger {
    /// Create a ledger whose records may be pruned `ttl` after the logout.
    pub fn new(store: SharedStore, clock: SharedClock, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl,
            memo: RwLock::new(HashMap::new()),
            memo_capacity: DEFAULT_MEMO_CAPACITY,
        }
    }

    /// Set the memo size past which absent records are no longer memoised.
    pub fn with_memo_capacity(mut self, capacity: usize) -> Self {
        self.memo_capacity = capacity;
        self
    }

    /// Record a logout of `subject_id` at the current time.
    pub async fn record_logout(&self, subject_id: &str) -> StoreResult<LogoutRecord> {
        let record = LogoutRecord::new(subject_id, self.clock.now(), self.ttl);
        self.memo
            .write()
            .insert(subject_id.to_string(), Some(record.logged_out_at));

        let body = serde_json::to_value(&record)?;
        self.store.set(Collection::Logouts, subject_id, body).await?;

        info!(
            subject_id,
            logged_out_at = %record.logged_out_at,
            "Logout recorded"
        );
        Ok(record)
    }

    /// Time of the subject's most recent logout, if any.
    pub async fn logged_out_at(&self, subject_id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        if let Some(known) = self.memo.read().get(subject_id) {
            return Ok(*known);
        }

        let loaded = match self.store.get(Collection::Logouts, subject_id).await? {
            Some(body) => {
                let record: LogoutRecord = decode(subject_id, body)?;
                if record.subject_id != subject_id {
                    return Err(StoreError::Corrupt {
                        collection: Collection::Logouts.to_string(),
                        key: subject_id.to_string(),
                        reason: format!("record names subject {}", record.subject_id),
                    });
                }
                Some(record.logged_out_at)
            }
            None => None,
        };

        // A logout recorded while the read was in flight wins.
        let mut memo = self.memo.write();
        if let Some(known) = memo.get(subject_id) {
            return Ok(*known);
        }
        if loaded.is_some() || memo.len() < self.memo_capacity {
            memo.insert(subject_id.to_string(), loaded);
        }
        Ok(loaded)
    }

    /// True when `issued_at` predates the subject's most recent logout.
    ///
    /// The record's own `expires_at` is retention only and never consulted.
    pub async fn was_issued_before_logout(
        &self,
        subject_id: &str,
        issued_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(self
            .logged_out_at(subject_id)
            .await?
            .is_some_and(|logged_out_at| issued_at < logged_out_at))
    }

    /// Delete records whose retention has passed. Returns the count removed.
    ///
    /// Memo entries for pruned records are dropped along with cached
    /// "no record" entries, which are cheap to re-read.
    pub async fn prune(&self) -> StoreResult<usize> {
        self.memo.write().retain(|_, known| known.is_some());

        let now = self.clock.now();
        let stale = self
            .store
            .find(Collection::Logouts, Filter::ExpiresAtOrBefore(now))
            .await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        let mut pruned = Vec::with_capacity(stale.len());
        for doc in &stale {
            batch.delete(Collection::Logouts, doc.key.clone());
            let logged_out_at = doc.decode::<LogoutRecord>().ok().map(|r| r.logged_out_at);
            pruned.push((doc.key.as_str(), logged_out_at));
        }
        self.store.commit(batch).await?;

        let mut memo = self.memo.write();
        for (key, logged_out_at) in pruned {
            // Keep a newer logout recorded after the query ran.
            if logged_out_at.is_none() || memo.get(key).copied().flatten() == logged_out_at {
                memo.remove(key);
            }
        }

        debug!(pruned = stale.len(), "Pruned logout ledger");
        Ok(stale.len())
    }

    /// Number of subjects with a memoised ledger lookup.
    pub fn memo_len(&self) -> usize {
        self.memo.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::{DocumentStore, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, ManualClock, RevocationLedger) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::default();
        let ledger = RevocationLedger::new(
            store.clone(),
            Arc::new(clock.clone()),
            Duration::days(7),
        );
        (store, clock, ledger)
    }

    #[tokio::test]
    async fn test_no_record_means_not_revoked() {
        let (_, clock, ledger) = setup();
        assert!(!ledger.was_issued_before_logout("alice", clock.now()).await.unwrap());
        assert_eq!(ledger.logged_out_at("alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_revocation_boundary() {
        let (_, clock, ledger) = setup();
        let record = ledger.record_logout("alice").await.unwrap();
        let t = record.logged_out_at;

        assert!(ledger
            .was_issued_before_logout("alice", t - Duration::milliseconds(1))
            .await
            .unwrap());
        assert!(!ledger.was_issued_before_logout("alice", t).await.unwrap());
        assert!(!ledger
            .was_issued_before_logout("alice", t + Duration::milliseconds(1))
            .await
            .unwrap());
        assert_eq!(clock.now(), t);
    }

    #[tokio::test]
    async fn test_stale_record_still_revokes() {
        let (_, clock, ledger) = setup();
        let record = ledger.record_logout("alice").await.unwrap();

        clock.advance(Duration::days(30));
        assert!(ledger
            .was_issued_before_logout("alice", record.logged_out_at - Duration::seconds(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_memo_avoids_repeat_reads() {
        let (store, clock, ledger) = setup();
        assert!(!ledger.was_issued_before_logout("alice", clock.now()).await.unwrap());

        // Once memoised, an outage does not affect the lookup.
        store.set_available(false);
        assert!(!ledger.was_issued_before_logout("alice", clock.now()).await.unwrap());
        assert!(ledger.logged_out_at("bob").await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_reads_records_written_by_another_process() {
        let (store, _, ledger) = setup();
        store
            .set(
                Collection::Logouts,
                "alice",
                json!({
                    "subject_id": "alice",
                    "logged_out_at": 1_700_000_000_000i64,
                    "expires_at": 1_700_604_800_000i64,
                }),
            )
            .await
            .unwrap();

        let at = ledger.logged_out_at("alice").await.unwrap().unwrap();
        assert_eq!(at.timestamp_millis(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_mismatched_record_is_corrupt() {
        let (store, clock, ledger) = setup();
        let record = LogoutRecord::new("mallory", clock.now(), Duration::days(7));
        store
            .set(Collection::Logouts, "alice", serde_json::to_value(&record).unwrap())
            .await
            .unwrap();

        let err = ledger.logged_out_at("alice").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_failed_write_still_revokes_locally() {
        let (store, _, ledger) = setup();
        store.set_available(false);

        assert!(ledger.record_logout("alice").await.is_err());
        let at = ledger.logged_out_at("alice").await.unwrap();
        assert!(at.is_some());
    }

    #[tokio::test]
    async fn test_prune_removes_only_expired_records() {
        let (store, clock, ledger) = setup();
        ledger.record_logout("alice").await.unwrap();
        clock.advance(Duration::days(6));
        ledger.record_logout("bob").await.unwrap();

        clock.advance(Duration::days(1));
        assert_eq!(ledger.prune().await.unwrap(), 1);
        assert_eq!(store.count(Collection::Logouts), 1);
        assert_eq!(ledger.logged_out_at("alice").await.unwrap(), None);
        assert!(ledger.logged_out_at("bob").await.unwrap().is_some());

        assert_eq!(ledger.prune().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_drops_absence_entries() {
        let (_, _, ledger) = setup();
        for i in 0..1000 {
            ledger.logged_out_at(&format!("user-{i}")).await.unwrap();
        }
        ledger.record_logout("alice").await.unwrap();
        assert_eq!(ledger.memo_len(), 1001);

        assert_eq!(ledger.prune().await.unwrap(), 0);
        assert_eq!(ledger.memo_len(), 1);
        assert!(ledger.logged_out_at("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memo_capacity_bounds_absence_entries() {
        let (_, _, ledger) = setup();
        let ledger = ledger.with_memo_capacity(3);
        for i in 0..10 {
            assert_eq!(ledger.logged_out_at(&format!("user-{i}")).await.unwrap(), None);
        }
        assert_eq!(ledger.memo_len(), 3);

        // Logouts are always memoised so a failed write still revokes.
        ledger.record_logout("alice").await.unwrap();
        assert_eq!(ledger.memo_len(), 4);
    }
}
