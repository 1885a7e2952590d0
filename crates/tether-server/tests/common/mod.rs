//! Common test utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tempfile::TempDir;
use tether_server::{Claims, JwtVerifier, Server, ServerConfig, issue_token};
use tether_session::{EngineConfig, SessionEngine, SqliteStore};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const SECRET: &[u8] = b"integration-test-secret";

/// A test server backed by SQLite in a temporary directory.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// HTTP client for raw requests.
    pub client: Client,
    /// The engine behind the server.
    pub engine: Arc<SessionEngine>,
    /// Temporary directory holding the database.
    pub temp_dir: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a new test server with a fresh database.
    pub async fn start() -> Result<Self> {
        Self::start_in(TempDir::new()?).await
    }

    async fn start_in(temp_dir: TempDir) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&temp_dir.path().join("tether.db"))?);
        let engine = Arc::new(SessionEngine::new(store, EngineConfig::default()));
        engine.start();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let config = ServerConfig::new()
            .with_bind_address(addr)
            .with_request_logging(false);
        let server = Server::new(engine.clone(), Arc::new(JwtVerifier::new(SECRET)), config);

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = server
                .serve(listener, async move {
                    let _ = rx.await;
                })
                .await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            engine,
            temp_dir,
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    /// Stop the server, flush the engine, and start again on the same database.
    pub async fn restart(mut self) -> Result<Self> {
        self.stop().await?;
        Self::start_in(self.temp_dir).await
    }

    /// Stop the server and flush every queued write.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        self.engine.shutdown().await?;
        Ok(())
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// GET with a bearer token.
    pub fn get(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url(), path))
            .bearer_auth(token)
    }

    /// POST with a bearer token.
    pub fn post(&self, path: &str, token: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url(), path))
            .bearer_auth(token)
    }
}

/// Mint a token for `subject` issued at `issued_at`, valid for an hour.
pub fn mint(subject: &str, issued_at: DateTime<Utc>) -> String {
    let claims = Claims::new(subject, issued_at, chrono::Duration::hours(1));
    issue_token(SECRET, &claims).expect("failed to sign test token")
}

/// Mint a token for `subject` issued a few seconds ago.
pub fn mint_recent(subject: &str) -> String {
    mint(subject, Utc::now() - chrono::Duration::seconds(10))
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}
