//! Main client implementation.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::credential::{CredentialSource, StaticCredential};
use crate::error::{Error, ErrorResponse, Result};
use crate::refresh::CredentialRefreshCoordinator;
use crate::retry::{DEFAULT_MAX_RETRIES, LogoutHandler, LogoutReason, RequestContext, RetryDispatcher};
use crate::types::{HealthResponse, LogoutResponse, SessionInfo};

/// Default timeout for requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tether API client.
///
/// Every authenticated call goes through a [`RetryDispatcher`], so an expired
/// credential is refreshed once and the request resent, while an expired
/// session signs the user out.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tether_client::{LogoutReason, StaticCredential, TetherClient};
///
/// # async fn example() -> tether_client::Result<()> {
/// let client = TetherClient::builder()
///     .base_url("http://localhost:8080")
///     .credentials(Arc::new(StaticCredential::new("token")))
///     .on_logout(|reason: LogoutReason| eprintln!("signed out: {reason:?}"))
///     .build()?;
///
/// let session = client.session().await?;
/// println!("session {} expires at {}", session.session_id, session.expires_at);
/// client.logout().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TetherClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    dispatcher: RetryDispatcher,
}

impl TetherClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The dispatcher handling credentials and 401 responses.
    pub fn dispatcher(&self) -> &RetryDispatcher {
        &self.inner.dispatcher
    }

    /// Check server health. Unauthenticated.
    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.inner.base_url.join("health")?;
        let response = self
            .inner
            .http
            .get(url)
            .timeout(self.inner.timeout)
            .send()
            .await?;
        handle_response(response).await
    }

    /// Identity and session window of the current user.
    pub async fn session(&self) -> Result<SessionInfo> {
        self.get("auth/session").await
    }

    /// End the current session on the server.
    pub async fn logout(&self) -> Result<()> {
        let response: LogoutResponse = self.send(Method::POST, "auth/logout", None::<&()>).await?;
        if !response.success {
            return Err(Error::Api {
                status: 200,
                code: "LOGOUT_FAILED".to_string(),
                message: "Server did not confirm logout".to_string(),
            });
        }
        Ok(())
    }

    /// Authenticated GET of an API path.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(Method::GET, path, None::<&()>).await
    }

    /// Authenticated POST of a JSON body to an API path.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, path, Some(body)).await
    }

    /// Build a URL for an API path.
    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        self.inner
            .base_url
            .join(&format!("api/v1/{}", path))
            .map_err(Error::from)
    }

    async fn send<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(path)?;
        let body = body.map(serde_json::to_value).transpose()?;
        let mut ctx = RequestContext::new();

        self.inner
            .dispatcher
            .dispatch(&mut ctx, |token| {
                let request = self.request(method.clone(), url.clone(), body.as_ref(), token);
                async move { handle_response(request.send().await?).await }
            })
            .await
    }

    fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        token: Option<String>,
    ) -> RequestBuilder {
        let mut request = self
            .inner
            .http
            .request(method, url)
            .timeout(self.inner.timeout);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request
    }
}

/// Handle a response, extracting the body or error.
async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if response.status().is_success() {
        Ok(response.json().await?)
    } else {
        Err(extract_error(response).await)
    }
}

/// Extract an error from a failed response.
async fn extract_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();

    match response.json::<ErrorResponse>().await {
        Ok(err) => Error::Api {
            status,
            code: err.code,
            message: err.message,
        },
        Err(_) => Error::Api {
            status,
            code: "unknown".to_string(),
            message: format!("HTTP {}", status),
        },
    }
}

/// Builder for creating a TetherClient.
pub struct ClientBuilder {
    base_url: Option<String>,
    credentials: Option<Arc<dyn CredentialSource>>,
    logout: Option<Arc<dyn LogoutHandler>>,
    timeout: Duration,
    max_retries: u32,
    user_agent: Option<String>,
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            base_url: None,
            credentials: None,
            logout: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: None,
        }
    }

    /// Set the base URL for the server.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Use a fixed authentication token.
    pub fn auth_token(self, token: impl Into<String>) -> Self {
        self.credentials(Arc::new(StaticCredential::new(token)))
    }

    /// Set the credential source.
    pub fn credentials(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    /// Set the callback run when the user must be signed out.
    pub fn on_logout(mut self, handler: impl LogoutHandler + 'static) -> Self {
        self.logout = Some(Arc::new(handler));
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the refresh-and-retry budget per request.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<TetherClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;

        // Parse and normalize base URL
        let mut base_url = Url::parse(&base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("tether-client/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .build()?;

        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(StaticCredential::default()));
        let logout = self.logout.unwrap_or_else(|| {
            Arc::new(|reason: LogoutReason| {
                tracing::info!(?reason, "Signed out");
            })
        });
        let dispatcher = RetryDispatcher::new(
            Arc::new(CredentialRefreshCoordinator::new(credentials)),
            logout,
        )
        .with_max_retries(self.max_retries);

        Ok(TetherClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                timeout: self.timeout,
                dispatcher,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_base_url() {
        let result = ClientBuilder::new().build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_normalizes_trailing_slash() {
        let client = ClientBuilder::new()
            .base_url("http://localhost:8080/tether")
            .build()
            .unwrap();

        assert_eq!(client.base_url().as_str(), "http://localhost:8080/tether/");
    }

    #[test]
    fn test_url_building() {
        let client = ClientBuilder::new()
            .base_url("http://localhost:8080")
            .build()
            .unwrap();

        let url = client.url("auth/session").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/v1/auth/session");

        let url = client.url("/auth/logout").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/v1/auth/logout");
    }
}
