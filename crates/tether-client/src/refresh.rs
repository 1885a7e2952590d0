//! Single-flight credential refresh.
//!
//! When many requests see an expired credential at once, exactly one refresh
//! runs against the [`CredentialSource`]; every other caller waits on a
//! oneshot channel and receives the same token (or the same error).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::credential::{CredentialError, CredentialSource};

type Waiter = oneshot::Sender<Result<String, CredentialError>>;

/// Callers waiting on an in-flight refresh.
#[derive(Debug, Default)]
pub struct RequestQueue {
    waiters: Vec<Waiter>,
}

impl RequestQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter and return the receiving half.
    pub fn push(&mut self) -> oneshot::Receiver<Result<String, CredentialError>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    /// Resolve every waiter with `token` and empty the queue.
    ///
    /// Returns how many waiters were still listening.
    pub fn flush(&mut self, token: &str) -> usize {
        self.waiters
            .drain(..)
            .map(|tx| tx.send(Ok(token.to_string())).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }

    /// Reject every waiter with `error` and empty the queue.
    pub fn reject_all(&mut self, error: &CredentialError) -> usize {
        self.waiters
            .drain(..)
            .map(|tx| tx.send(Err(error.clone())).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }

    /// Number of queued waiters.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Check if no waiter is queued.
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

#[derive(Debug, Default)]
struct RefreshState {
    in_flight: bool,
    queue: RequestQueue,
}

/// Coordinates credential reads and refreshes for one client.
#[derive(Debug)]
pub struct CredentialRefreshCoordinator {
    source: Arc<dyn CredentialSource>,
    state: Mutex<RefreshState>,
    refreshes: AtomicUsize,
}

impl CredentialRefreshCoordinator {
    /// Create a coordinator over `source`.
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            state: Mutex::new(RefreshState::default()),
            refreshes: AtomicUsize::new(0),
        }
    }

    /// Current token from the source. A forced refresh goes through
    /// [`refresh_token`](Self::refresh_token).
    pub async fn get_token(&self, force_refresh: bool) -> Result<Option<String>, CredentialError> {
        if force_refresh {
            return self.refresh_token().await.map(Some);
        }
        self.source.get_token(false).await
    }

    /// Obtain a fresh token, joining the in-flight refresh if there is one.
    pub async fn refresh_token(&self) -> Result<String, CredentialError> {
        let waiter = {
            let mut state = self.state.lock();
            if state.in_flight {
                Some(state.queue.push())
            } else {
                state.in_flight = true;
                None
            }
        };

        if let Some(rx) = waiter {
            debug!("Joining in-flight credential refresh");
            // A dropped sender means the leader vanished without settling.
            return rx.await.unwrap_or(Err(CredentialError::Cancelled));
        }

        let guard = InFlight {
            coordinator: self,
            settled: false,
        };
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        let result = match self.source.get_token(true).await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(CredentialError::Missing),
            Err(e) => Err(e),
        };
        guard.settle(&result);
        result
    }

    /// Check if a refresh is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.state.lock().in_flight
    }

    /// Number of refreshes started against the source.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Relaxed)
    }
}

/// Clears the in-flight marker however the leader exits.
struct InFlight<'a> {
    coordinator: &'a CredentialRefreshCoordinator,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(mut self, result: &Result<String, CredentialError>) {
        self.settled = true;
        let mut queue = self.take_queue();
        match result {
            Ok(token) => {
                let delivered = queue.flush(token);
                debug!(waiters = delivered, "Credential refreshed");
            }
            Err(e) => {
                let delivered = queue.reject_all(e);
                warn!(error = %e, waiters = delivered, "Credential refresh failed");
            }
        }
    }

    fn take_queue(&self) -> RequestQueue {
        let mut state = self.coordinator.state.lock();
        state.in_flight = false;
        std::mem::take(&mut state.queue)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut queue = self.take_queue();
        queue.reject_all(&CredentialError::Cancelled);
        debug!("Credential refresh abandoned");
    }
}
