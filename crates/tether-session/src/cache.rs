//! In-memory cache of hot session records.
//!
//! Expiry is decided by comparing `expires_at` against the injected clock on
//! read; there is no background eviction. Callers bound memory by running
//! [`ActivityCache::clear_expired`] periodically.

use std::collections::HashMap;

use chrono::Duration;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::clock::SharedClock;
use crate::record::SessionRecord;

/// Map from subject id to that subject's session record.
///
/// Every operation is synchronous and guarded by a non-poisoning lock, so the
/// cache fast path never suspends.
#[derive(Debug)]
pub struct ActivityCache {
    entries: RwLock<HashMap<String, SessionRecord>>,
    clock: SharedClock,
}

impl ActivityCache {
    /// Create an empty cache reading time from `clock`.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Cached record for a subject, expired or not.
    pub fn get(&self, subject_id: &str) -> Option<SessionRecord> {
        let record = self.entries.read().get(subject_id).cloned();
        trace!(subject_id = %subject_id, hit = record.is_some(), "Activity cache lookup");
        record
    }

    /// Insert or replace the record for a subject.
    pub fn set(&self, subject_id: &str, record: SessionRecord) {
        self.entries.write().insert(subject_id.to_string(), record);
    }

    /// True when the subject has no record or its record is past expiry.
    pub fn is_expired(&self, subject_id: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .read()
            .get(subject_id)
            .is_none_or(|record| record.is_expired_at(now))
    }

    /// Extend a cached record in place and return the updated copy.
    ///
    /// The read-modify-write happens under one write lock so concurrent
    /// extensions for the same subject cannot interleave. Returns `None` when
    /// the subject is no longer cached.
    pub fn extend(&self, subject_id: &str, timeout: Duration) -> Option<SessionRecord> {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let record = entries.get_mut(subject_id)?;
        record.extend(now, timeout);
        Some(record.clone())
    }

    /// Remove a subject's record.
    pub fn clear(&self, subject_id: &str) -> Option<SessionRecord> {
        self.entries.write().remove(subject_id)
    }

    /// Remove every expired record, returning how many were dropped.
    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, record| !record.is_expired_at(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Swept expired sessions from cache");
        }
        removed
    }

    /// Drop every record.
    pub fn clear_all(&self) {
        self.entries.write().clear();
    }

    /// Number of cached records, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
