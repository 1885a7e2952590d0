//! Sources of bearer credentials.

use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;

/// Error produced while obtaining a credential.
///
/// Cloneable so one refresh failure can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// The source has no credential to offer.
    #[error("No credential available")]
    Missing,

    /// The source tried and failed to mint a new credential.
    #[error("Credential refresh failed: {0}")]
    Refresh(String),

    /// The refresh was abandoned before it completed.
    #[error("Credential refresh was cancelled")]
    Cancelled,
}

/// Supplier of bearer tokens.
#[async_trait]
pub trait CredentialSource: Send + Sync + fmt::Debug {
    /// Current token, or a freshly minted one when `force_refresh` is set.
    async fn get_token(&self, force_refresh: bool) -> Result<Option<String>, CredentialError>;
}

/// A fixed token that cannot be refreshed.
///
/// A forced refresh hands back the same token, so an expired credential
/// exhausts the retry budget and signs the caller out.
#[derive(Debug, Default)]
pub struct StaticCredential {
    token: RwLock<Option<String>>,
}

impl StaticCredential {
    /// Wrap `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Replace the token, e.g. after the user signs in again.
    pub fn set(&self, token: Option<String>) {
        *self.token.write() = token;
    }
}

#[async_trait]
impl CredentialSource for StaticCredential {
    async fn get_token(&self, _force_refresh: bool) -> Result<Option<String>, CredentialError> {
        Ok(self.token.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_credential() {
        let source = StaticCredential::new("abc");
        assert_eq!(source.get_token(false).await.unwrap().as_deref(), Some("abc"));
        assert_eq!(source.get_token(true).await.unwrap().as_deref(), Some("abc"));

        source.set(None);
        assert_eq!(source.get_token(false).await.unwrap(), None);
    }
}
