//! Bearer credential verification.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Default clock-skew allowance when checking `exp`, in seconds.
pub const DEFAULT_LEEWAY_SECS: u64 = 5;

/// Identity extracted from a verified credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedIdentity {
    pub subject_id: String,
    pub issued_at: DateTime<Utc>,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Verification failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// The credential is well-formed and authentic but past its expiry.
    #[error("Token has expired")]
    Expired,

    /// The credential is malformed, forged, or otherwise unusable.
    #[error("Invalid token: {0}")]
    Invalid(String),
}

/// Turns a bearer credential into a subject identity.
#[async_trait]
pub trait Verifier: Send + Sync + fmt::Debug {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerifyError>;
}

/// JWT claims understood by [`JwtVerifier`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id.
    pub sub: String,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Claims {
    /// Claims for `subject` issued at `issued_at`, valid for `ttl`.
    pub fn new(subject: impl Into<String>, issued_at: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            sub: subject.into(),
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
            email: None,
            name: None,
        }
    }
}

/// HS256 JWT verifier.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("validation", &self.validation)
            .finish()
    }
}

impl JwtVerifier {
    /// Create a verifier for tokens signed with `secret`.
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = DEFAULT_LEEWAY_SECS;
        validation.set_required_spec_claims(&["exp", "sub", "iat"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Set the clock-skew allowance for `exp`.
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.validation.leeway = leeway_secs;
        self
    }
}

#[async_trait]
impl Verifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerifyError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => VerifyError::Expired,
                ErrorKind::InvalidSignature => VerifyError::Invalid("bad signature".to_string()),
                _ => VerifyError::Invalid(e.to_string()),
            }
        })?;
        let claims = data.claims;

        if claims.sub.is_empty() {
            return Err(VerifyError::Invalid("empty subject".to_string()));
        }

        // `iat` has whole-second precision; a token counts as issued at the
        // start of its second, so anything minted before a logout is revoked.
        let issued_at = DateTime::from_timestamp(claims.iat, 0)
            .ok_or_else(|| VerifyError::Invalid("iat out of range".to_string()))?;

        Ok(VerifiedIdentity {
            subject_id: claims.sub,
            issued_at,
            email: claims.email,
            display_name: claims.name,
        })
    }
}

/// Sign `claims` with `secret` using HS256.
pub fn issue_token(secret: &[u8], claims: &Claims) -> Result<String, VerifyError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| VerifyError::Invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &[u8] = b"unit-test-secret";

    #[tokio::test]
    async fn test_valid_token() {
        let now = Utc::now();
        let mut claims = Claims::new("alice", now, Duration::minutes(10));
        claims.email = Some("alice@example.com".to_string());
        claims.name = Some("Alice".to_string());
        let token = issue_token(SECRET, &claims).unwrap();

        let identity = JwtVerifier::new(SECRET).verify(&token).await.unwrap();
        assert_eq!(identity.subject_id, "alice");
        assert_eq!(identity.issued_at.timestamp(), now.timestamp());
        assert!(identity.issued_at <= now);
        assert_eq!(identity.email.as_deref(), Some("alice@example.com"));
        assert_eq!(identity.display_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_issued_at_is_start_of_second() {
        let minted = DateTime::from_timestamp(1_700_000_000, 900_000_000).unwrap();
        let claims = Claims::new("alice", minted, Duration::days(36_500));
        let token = issue_token(SECRET, &claims).unwrap();

        let identity = JwtVerifier::new(SECRET).verify(&token).await.unwrap();
        assert_eq!(
            identity.issued_at,
            DateTime::from_timestamp(1_700_000_000, 0).unwrap()
        );

        // A logout later in the same second revokes the token.
        let logged_out_at = DateTime::from_timestamp(1_700_000_000, 500_000_000).unwrap();
        assert!(identity.issued_at < logged_out_at);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let claims = Claims::new("alice", Utc::now() - Duration::hours(2), Duration::hours(1));
        let token = issue_token(SECRET, &claims).unwrap();

        let err = JwtVerifier::new(SECRET).verify(&token).await.unwrap_err();
        assert_eq!(err, VerifyError::Expired);
    }

    #[tokio::test]
    async fn test_wrong_secret_is_invalid() {
        let claims = Claims::new("alice", Utc::now(), Duration::minutes(10));
        let token = issue_token(b"other-secret", &claims).unwrap();

        let err = JwtVerifier::new(SECRET).verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_garbage_is_invalid() {
        let err = JwtVerifier::new(SECRET).verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, VerifyError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_empty_subject_is_invalid() {
        let claims = Claims::new("", Utc::now(), Duration::minutes(10));
        let token = issue_token(SECRET, &claims).unwrap();

        let err = JwtVerifier::new(SECRET).verify(&token).await.unwrap_err();
        assert_eq!(err, VerifyError::Invalid("empty subject".to_string()));
    }
}
