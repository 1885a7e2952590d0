//! Session and logout records as held in memory and in the durable store.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::Collection;

/// Field holding the owning subject in session and logout documents.
pub const SUBJECT_FIELD: &str = "subject_id";

/// A record that lives in a durable-store collection.
pub trait Document: Serialize + DeserializeOwned {
    /// Collection the record is stored in.
    const COLLECTION: Collection;

    /// Document key within the collection.
    fn key(&self) -> &str;
}

/// State of a subject's live session window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Subject that owns the session.
    pub subject_id: String,

    /// Opaque identifier generated at creation; the durable document key.
    pub session_id: String,

    /// When the session was created. Never changes.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,

    /// Last request seen for this session.
    #[serde(with = "timestamp")]
    pub last_activity_at: DateTime<Utc>,

    /// `last_activity_at + inactivity_timeout`.
    #[serde(with = "timestamp")]
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Open a new session at `now` with a fresh session id.
    pub fn new(subject_id: impl Into<String>, now: DateTime<Utc>, timeout: Duration) -> Self {
        Self {
            subject_id: subject_id.into(),
            session_id: Uuid::new_v4().to_string(),
            created_at: now,
            last_activity_at: now,
            expires_at: now + timeout,
        }
    }

    /// Record activity at `now`, pushing the expiry out by `timeout`.
    pub fn extend(&mut self, now: DateTime<Utc>, timeout: Duration) {
        self.last_activity_at = now;
        self.expires_at = now + timeout;
    }

    /// True once `now` is strictly past the expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

impl Document for SessionRecord {
    const COLLECTION: Collection = Collection::Sessions;

    fn key(&self) -> &str {
        &self.session_id
    }
}

/// The most recent logout of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRecord {
    /// Subject that logged out; the durable document key.
    pub subject_id: String,

    /// When the logout happened. Credentials issued earlier are revoked.
    #[serde(with = "timestamp")]
    pub logged_out_at: DateTime<Utc>,

    /// Earliest time the record may be pruned. Does not affect revocation.
    #[serde(with = "timestamp")]
    pub expires_at: DateTime<Utc>,
}

impl LogoutRecord {
    /// Record a logout at `now`, retained for `ttl`.
    pub fn new(subject_id: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            subject_id: subject_id.into(),
            logged_out_at: now,
            expires_at: now + ttl,
        }
    }

    /// True when `issued_at` predates this logout.
    pub fn revokes(&self, issued_at: DateTime<Utc>) -> bool {
        issued_at < self.logged_out_at
    }
}

impl Document for LogoutRecord {
    const COLLECTION: Collection = Collection::Logouts;

    fn key(&self) -> &str {
        &self.subject_id
    }
}

/// Outcome of validating a subject's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// A live, unexpired session exists.
    Valid,
    /// A session exists but its inactivity window has passed.
    Expired,
    /// No session exists for the subject.
    NotFound,
    /// A record was found under the subject but names a different subject.
    DataIntegrityError,
}

impl SessionStatus {
    /// Check if this status is [`SessionStatus::Valid`].
    pub fn is_valid(self) -> bool {
        matches!(self, SessionStatus::Valid)
    }
}

/// Serde codec for document timestamps.
///
/// Writes RFC 3339 strings. Reads RFC 3339 strings or integer epoch
/// milliseconds, the form most document stores use natively.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Text(s) => {
                parse_text(&s).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{s}'")))
            }
            Raw::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| D::Error::custom(format!("timestamp {ms} out of range"))),
        }
    }

    /// Extract a timestamp from a raw document field.
    pub fn from_value(value: &Value) -> Option<DateTime<Utc>> {
        match value {
            Value::String(s) => parse_text(s),
            Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
            _ => None,
        }
    }

    fn parse_text(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}
