//! In-memory document store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{Collection, DocumentStore, Filter, StoredDocument, WriteBatch, WriteOp};
use crate::error::{StoreError, StoreResult};

/// In-memory store for tests and single-process deployments.
///
/// Can be switched unavailable to exercise infrastructure-failure paths, and
/// counts committed batches.
#[derive(Debug)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<(Collection, String), Value>>,
    available: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty, available store.
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            commits: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent call succeed (`true`) or fail as unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of batches committed successfully.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: Collection) -> usize {
        self.docs
            .read()
            .keys()
            .filter(|(c, _)| *c == collection)
            .count()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Value>> {
        self.check_available()?;
        Ok(self.docs.read().get(&(collection, key.to_string())).cloned())
    }

    async fn set(&self, collection: Collection, key: &str, body: Value) -> StoreResult<()> {
        self.check_available()?;
        self.docs.write().insert((collection, key.to_string()), body);
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> StoreResult<()> {
        self.check_available()?;
        self.docs.write().remove(&(collection, key.to_string()));
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        self.check_available()?;
        let mut docs = self.docs.write();
        for op in batch.into_ops() {
            match op {
                WriteOp::Set {
                    collection,
                    key,
                    body,
                } => {
                    docs.insert((collection, key), body);
                }
                WriteOp::Delete { collection, key } => {
                    docs.remove(&(collection, key));
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find(&self, collection: Collection, filter: Filter) -> StoreResult<Vec<StoredDocument>> {
        self.check_available()?;
        let docs = self.docs.read();
        Ok(docs
            .iter()
            .filter(|((c, _), body)| *c == collection && filter.matches(body))
            .map(|((_, key), body)| StoredDocument {
                key: key.clone(),
                body: body.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store
            .set(Collection::Sessions, "s1", json!({ "subject_id": "alice" }))
            .await
            .unwrap();

        let doc = store.get(Collection::Sessions, "s1").await.unwrap();
        assert_eq!(doc, Some(json!({ "subject_id": "alice" })));
        assert!(store.get(Collection::Logouts, "s1").await.unwrap().is_none());

        store.delete(Collection::Sessions, "s1").await.unwrap();
        assert!(store.get(Collection::Sessions, "s1").await.unwrap().is_none());
        // Deleting again is fine.
        store.delete(Collection::Sessions, "s1").await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_applies_all_ops() {
        let store = MemoryStore::new();
        store
            .set(Collection::Sessions, "old", json!({}))
            .await
            .unwrap();

        let mut batch = WriteBatch::new();
        batch.delete(Collection::Sessions, "old");
        batch.ops.push(WriteOp::Set {
            collection: Collection::Sessions,
            key: "new".to_string(),
            body: json!({ "subject_id": "alice" }),
        });
        store.commit(batch).await.unwrap();

        assert_eq!(store.commit_count(), 1);
        assert_eq!(store.count(Collection::Sessions), 1);
        assert!(store.get(Collection::Sessions, "new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);

        let err = store.get(Collection::Sessions, "s1").await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.commit(WriteBatch::new()).await.is_err());
        assert_eq!(store.commit_count(), 0);

        store.set_available(true);
        assert!(store.get(Collection::Sessions, "s1").await.is_ok());
    }

    #[tokio::test]
    async fn test_find_filters_by_collection() {
        let store = MemoryStore::new();
        store
            .set(Collection::Sessions, "s1", json!({ "subject_id": "alice" }))
            .await
            .unwrap();
        store
            .set(Collection::Logouts, "alice", json!({ "subject_id": "alice" }))
            .await
            .unwrap();

        let found = store
            .find(Collection::Sessions, Filter::field_eq("subject_id", "alice"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "s1");
    }
}
