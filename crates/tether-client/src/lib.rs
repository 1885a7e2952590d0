//! Client side of the tether session protocol.
//!
//! - [`CredentialRefreshCoordinator`] collapses concurrent credential
//!   refreshes into one in-flight call shared by every waiter.
//! - [`RetryDispatcher`] classifies 401 responses: an expired credential is
//!   refreshed and the request resent, an expired session signs the user out.
//! - [`TetherClient`] is a reqwest client that routes every authenticated
//!   call through the dispatcher.

pub mod client;
pub mod credential;
pub mod error;
pub mod refresh;
pub mod retry;
pub mod types;

pub use client::{ClientBuilder, TetherClient};
pub use credential::{CredentialError, CredentialSource, StaticCredential};
pub use error::{Error, Result, SESSION_EXPIRED, TOKEN_EXPIRED};
pub use refresh::{CredentialRefreshCoordinator, RequestQueue};
pub use retry::{DEFAULT_MAX_RETRIES, LogoutHandler, LogoutReason, RequestContext, RetryDispatcher};
pub use types::{HealthResponse, LogoutResponse, SessionInfo};
