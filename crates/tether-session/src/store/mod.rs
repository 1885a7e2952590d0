//! Durable document store consumed by the engine.
//!
//! The store is an external collaborator: a key-value document store with
//! per-document atomic set/delete, an atomic batch commit, and best-effort
//! filtered queries. [`MemoryStore`] backs tests; [`SqliteStore`] backs the
//! server binary.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::record::{Document, timestamp};

/// Field every document carries for range queries.
pub const EXPIRES_AT_FIELD: &str = "expires_at";

/// Document collections used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    /// Session documents, keyed by session id.
    Sessions,
    /// Logout-ledger documents, keyed by subject id.
    Logouts,
}

impl Collection {
    /// Stable collection name.
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Sessions => "sessions",
            Collection::Logouts => "logouts",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query filter for [`DocumentStore::find`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// String field equals value.
    FieldEq { field: String, value: String },
    /// `expires_at > t`.
    ExpiresAfter(DateTime<Utc>),
    /// `expires_at <= t`.
    ExpiresAtOrBefore(DateTime<Utc>),
}

impl Filter {
    /// Equality filter on a string field.
    pub fn field_eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::FieldEq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Evaluate the filter against a document body.
    pub fn matches(&self, body: &Value) -> bool {
        match self {
            Filter::FieldEq { field, value } => {
                body.get(field).and_then(Value::as_str) == Some(value.as_str())
            }
            Filter::ExpiresAfter(t) => expires_at(body).is_some_and(|e| e > *t),
            Filter::ExpiresAtOrBefore(t) => expires_at(body).is_some_and(|e| e <= *t),
        }
    }
}

/// Read the `expires_at` field of a document body.
pub(crate) fn expires_at(body: &Value) -> Option<DateTime<Utc>> {
    body.get(EXPIRES_AT_FIELD).and_then(timestamp::from_value)
}

/// A document returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub key: String,
    pub body: Value,
}

impl StoredDocument {
    /// Decode the body into a typed record.
    pub fn decode<D: Document>(&self) -> StoreResult<D> {
        decode(&self.key, self.body.clone())
    }
}

/// Decode a raw body, classifying failures as corruption.
pub(crate) fn decode<D: Document>(key: &str, body: Value) -> StoreResult<D> {
    serde_json::from_value(body).map_err(|e| StoreError::Corrupt {
        collection: D::COLLECTION.to_string(),
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// A single operation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        collection: Collection,
        key: String,
        body: Value,
    },
    Delete {
        collection: Collection,
        key: String,
    },
}

/// Operations committed atomically by [`DocumentStore::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a typed record under its own key.
    pub fn put<D: Document>(&mut self, record: &D) -> StoreResult<&mut Self> {
        let body = serde_json::to_value(record)?;
        self.ops.push(WriteOp::Set {
            collection: D::COLLECTION,
            key: record.key().to_string(),
            body,
        });
        Ok(self)
    }

    /// Delete a document.
    pub fn delete(&mut self, collection: Collection, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            collection,
            key: key.into(),
        });
        self
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Check if the batch has no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operations in insertion order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Consume the batch.
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Durable document store.
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Fetch a document by key.
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Value>>;

    /// Upsert a document atomically.
    async fn set(&self, collection: Collection, key: &str, body: Value) -> StoreResult<()>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, collection: Collection, key: &str) -> StoreResult<()>;

    /// Apply every operation of the batch or none of them.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Documents of a collection matching the filter.
    async fn find(&self, collection: Collection, filter: Filter) -> StoreResult<Vec<StoredDocument>>;
}

/// Shared store handle.
pub type SharedStore = Arc<dyn DocumentStore>;

/// Applies a deadline to every call of the wrapped store.
///
/// An elapsed deadline surfaces as [`StoreError::Timeout`].
#[derive(Debug, Clone)]
pub struct TimeoutStore {
    inner: SharedStore,
    timeout: Duration,
}

impl TimeoutStore {
    /// Wrap `inner`, bounding each call by `timeout`.
    pub fn new(inner: SharedStore, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = StoreResult<T>> + Send,
    ) -> StoreResult<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl DocumentStore for TimeoutStore {
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Value>> {
        self.bounded(self.inner.get(collection, key)).await
    }

    async fn set(&self, collection: Collection, key: &str, body: Value) -> StoreResult<()> {
        self.bounded(self.inner.set(collection, key, body)).await
    }

    async fn delete(&self, collection: Collection, key: &str) -> StoreResult<()> {
        self.bounded(self.inner.delete(collection, key)).await
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        self.bounded(self.inner.commit(batch)).await
    }

    async fn find(&self, collection: Collection, filter: Filter) -> StoreResult<Vec<StoredDocument>> {
        self.bounded(self.inner.find(collection, filter)).await
    }
}
