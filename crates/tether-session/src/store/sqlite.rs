//! SQLite-backed document store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::Value;

use super::{Collection, DocumentStore, Filter, StoredDocument, WriteBatch, WriteOp, expires_at};
use crate::error::{StoreError, StoreResult};
use crate::record::SUBJECT_FIELD;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    collection    TEXT NOT NULL,
    key           TEXT NOT NULL,
    body          TEXT NOT NULL,
    expires_at_ms INTEGER,
    subject_id    TEXT,
    PRIMARY KEY (collection, key)
);
CREATE INDEX IF NOT EXISTS idx_documents_expiry ON documents (collection, expires_at_ms);
";

/// Databases created before `subject_id` was promoted to a column.
const ADD_SUBJECT_COLUMN: &str = "
ALTER TABLE documents ADD COLUMN subject_id TEXT;
UPDATE documents SET subject_id = json_extract(body, '$.subject_id');
";

const SUBJECT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_documents_subject ON documents (collection, subject_id);";

const UPSERT: &str = "INSERT INTO documents (collection, key, body, expires_at_ms, subject_id)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT (collection, key) DO UPDATE SET body = excluded.body,
         expires_at_ms = excluded.expires_at_ms, subject_id = excluded.subject_id";

const DELETE: &str = "DELETE FROM documents WHERE collection = ?1 AND key = ?2";

/// Thin document store over a single SQLite table.
///
/// Blocking SQLite calls run on the blocking pool; the connection is guarded
/// by a mutex.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

/// A write prepared outside the blocking task.
struct Row {
    collection: &'static str,
    key: String,
    body: Option<String>,
    expires_at_ms: Option<i64>,
    subject_id: Option<String>,
}

impl Row {
    fn set(collection: Collection, key: String, body: &Value) -> StoreResult<Self> {
        Ok(Self {
            collection: collection.as_str(),
            key,
            body: Some(serde_json::to_string(body)?),
            expires_at_ms: expires_at(body).map(|t| t.timestamp_millis()),
            subject_id: body
                .get(SUBJECT_FIELD)
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    fn delete(collection: Collection, key: String) -> Self {
        Self {
            collection: collection.as_str(),
            key,
            body: None,
            expires_at_ms: None,
            subject_id: None,
        }
    }

    fn apply(&self, conn: &Connection) -> rusqlite::Result<()> {
        match &self.body {
            Some(body) => conn.execute(
                UPSERT,
                params![
                    self.collection,
                    self.key,
                    body,
                    self.expires_at_ms,
                    self.subject_id
                ],
            )?,
            None => conn.execute(DELETE, params![self.collection, self.key])?,
        };
        Ok(())
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(sqlite_error)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(sqlite_error)?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(sqlite_error)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA).map_err(sqlite_error)?;
        let has_subject: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('documents') WHERE name = 'subject_id'",
                [],
                |row| row.get(0),
            )
            .map_err(sqlite_error)?;
        if !has_subject {
            conn.execute_batch(ADD_SUBJECT_COLUMN).map_err(sqlite_error)?;
        }
        conn.execute_batch(SUBJECT_INDEX).map_err(sqlite_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

fn sqlite_error(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(format!("sqlite: {e}"))
}

fn parse_body(collection: Collection, key: &str, raw: &str) -> StoreResult<Value> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        collection: collection.to_string(),
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: Collection, key: &str) -> StoreResult<Option<Value>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
                    params![collection.as_str(), key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sqlite_error)?;
            raw.map(|raw| parse_body(collection, &key, &raw)).transpose()
        })
        .await
    }

    async fn set(&self, collection: Collection, key: &str, body: Value) -> StoreResult<()> {
        let row = Row::set(collection, key.to_string(), &body)?;
        self.with_conn(move |conn| row.apply(conn).map_err(sqlite_error))
            .await
    }

    async fn delete(&self, collection: Collection, key: &str) -> StoreResult<()> {
        let row = Row::delete(collection, key.to_string());
        self.with_conn(move |conn| row.apply(conn).map_err(sqlite_error))
            .await
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let rows = batch
            .into_ops()
            .into_iter()
            .map(|op| match op {
                WriteOp::Set {
                    collection,
                    key,
                    body,
                } => Row::set(collection, key, &body),
                WriteOp::Delete { collection, key } => Ok(Row::delete(collection, key)),
            })
            .collect::<StoreResult<Vec<_>>>()?;

        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(sqlite_error)?;
            for row in &rows {
                row.apply(&tx).map_err(sqlite_error)?;
            }
            tx.commit().map_err(sqlite_error)
        })
        .await
    }

    async fn find(&self, collection: Collection, filter: Filter) -> StoreResult<Vec<StoredDocument>> {
        self.with_conn(move |conn| {
            // The SQL predicate is a millisecond-granular prefilter; `Filter::matches`
            // makes the final decision on the exact timestamps.
            let table = collection.as_str().to_string();
            let (sql, args): (&str, Vec<rusqlite::types::Value>) = match &filter {
                Filter::FieldEq { field, value } if field == SUBJECT_FIELD => (
                    "SELECT key, body FROM documents
                     WHERE collection = ?1 AND subject_id = ?2",
                    vec![table.into(), value.clone().into()],
                ),
                Filter::FieldEq { field, value } => (
                    "SELECT key, body FROM documents
                     WHERE collection = ?1 AND json_extract(body, '$.' || ?3) = ?2",
                    vec![table.into(), value.clone().into(), field.clone().into()],
                ),
                Filter::ExpiresAfter(t) => (
                    "SELECT key, body FROM documents
                     WHERE collection = ?1 AND expires_at_ms >= ?2",
                    vec![table.into(), t.timestamp_millis().into()],
                ),
                Filter::ExpiresAtOrBefore(t) => (
                    "SELECT key, body FROM documents
                     WHERE collection = ?1 AND expires_at_ms <= ?2",
                    vec![table.into(), t.timestamp_millis().into()],
                ),
            };

            let mut stmt = conn.prepare(sql).map_err(sqlite_error)?;
            let rows = stmt
                .query_map(params_from_iter(args), read_row)
                .map_err(sqlite_error)?
                .collect::<rusqlite::Result<Vec<(String, String)>>>()
                .map_err(sqlite_error)?;

            let mut docs = Vec::with_capacity(rows.len());
            for (key, raw) in rows {
                let body = parse_body(collection, &key, &raw)?;
                if filter.matches(&body) {
                    docs.push(StoredDocument { key, body });
                }
            }
            Ok(docs)
        })
        .await
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((row.get(0)?, row.get(1)?))
}
