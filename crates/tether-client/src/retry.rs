//! 401 classification and refresh-and-retry.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result, SESSION_EXPIRED, TOKEN_EXPIRED};
use crate::refresh::CredentialRefreshCoordinator;

/// Default number of refresh-and-retry rounds per request.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Why the dispatcher signed the user out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The server reported the session as expired or revoked.
    SessionExpired,
    /// The credential was still expired after the retry budget.
    RetriesExhausted,
    /// The credential could not be refreshed.
    RefreshFailed,
}

/// Invoked when the client must sign the user out.
pub trait LogoutHandler: Send + Sync {
    fn on_logout(&self, reason: LogoutReason);
}

impl<F> LogoutHandler for F
where
    F: Fn(LogoutReason) + Send + Sync,
{
    fn on_logout(&self, reason: LogoutReason) {
        self(reason)
    }
}

/// Per-request retry bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    retry_count: u32,
}

impl RequestContext {
    /// Context for a request that has not been retried.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh-and-retry rounds performed so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
}

/// Sends requests with the current credential and reacts to 401 responses.
#[derive(Clone)]
pub struct RetryDispatcher {
    coordinator: Arc<CredentialRefreshCoordinator>,
    logout: Arc<dyn LogoutHandler>,
    max_retries: u32,
}

impl fmt::Debug for RetryDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryDispatcher")
            .field("coordinator", &self.coordinator)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl RetryDispatcher {
    /// Create a dispatcher with [`DEFAULT_MAX_RETRIES`].
    pub fn new(
        coordinator: Arc<CredentialRefreshCoordinator>,
        logout: Arc<dyn LogoutHandler>,
    ) -> Self {
        Self {
            coordinator,
            logout,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the refresh-and-retry budget per request.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The credential coordinator used for refreshes.
    pub fn coordinator(&self) -> &Arc<CredentialRefreshCoordinator> {
        &self.coordinator
    }

    /// Issue a request through `send`, which receives the bearer token to use.
    ///
    /// - `SESSION_EXPIRED`: signs out, never refreshes.
    /// - `TOKEN_EXPIRED`: refreshes and resends while budget remains, then
    ///   signs out.
    /// - A failed refresh signs out and carries the cause.
    /// - Anything else is returned unchanged.
    pub async fn dispatch<T, F, Fut>(&self, ctx: &mut RequestContext, mut send: F) -> Result<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut token = self.coordinator.get_token(false).await?;

        loop {
            let err = match send(token.take()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err.unauthorized_code() {
                Some(SESSION_EXPIRED) => {
                    info!("Server ended the session, signing out");
                    self.logout.on_logout(LogoutReason::SessionExpired);
                    return Err(Error::SessionExpired);
                }
                Some(TOKEN_EXPIRED) => {
                    if ctx.retry_count >= self.max_retries {
                        warn!(
                            attempts = ctx.retry_count,
                            "Credential still expired after refresh, signing out"
                        );
                        self.logout.on_logout(LogoutReason::RetriesExhausted);
                        return Err(Error::RetriesExhausted {
                            attempts: ctx.retry_count,
                        });
                    }

                    match self.coordinator.refresh_token().await {
                        Ok(fresh) => {
                            ctx.retry_count += 1;
                            debug!(retry = ctx.retry_count, "Retrying with refreshed credential");
                            token = Some(fresh);
                        }
                        Err(source) => {
                            warn!(error = %source, "Credential refresh failed, signing out");
                            self.logout.on_logout(LogoutReason::RefreshFailed);
                            return Err(Error::RefreshFailed { source });
                        }
                    }
                }
                _ => return Err(err),
            }
        }
    }
}
