//! Serve command - runs the session server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use tether_server::{JwtVerifier, Server, ServerConfig};
use tether_session::{SessionEngine, SqliteStore, spawn_maintenance};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Context;

/// Arguments for the serve command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// SQLite database file (overrides config)
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Skip loading live sessions into the cache at startup
    #[arg(long)]
    pub no_warm_cache: bool,

    /// Disable per-request logging
    #[arg(long)]
    pub quiet_requests: bool,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let config = &ctx.config.config;
    let engine_config = config.engine_config()?;
    let server_section = config.server();
    let secret = config
        .jwt_secret()
        .with_context(|| format!("set {} or [server] jwt_secret", tether_config::JWT_SECRET_ENV))?;

    let database = match args.database {
        Some(path) => path,
        None => config.database_path()?,
    };
    if let Some(parent) = database.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(&database)
        .with_context(|| format!("failed to open database {}", database.display()))?;

    let engine = Arc::new(SessionEngine::new(Arc::new(store), engine_config));

    if config.maintenance().warm_cache_on_start && !args.no_warm_cache {
        match engine.warm_cache().await {
            Ok(loaded) => info!(loaded, "Session cache warmed"),
            Err(e) => warn!(error = %e, "Failed to warm session cache, continuing cold"),
        }
    }

    engine.start();
    let cancel = CancellationToken::new();
    let maintenance = spawn_maintenance(engine.clone(), cancel.clone());

    let addr = args.bind.unwrap_or(server_section.bind_address);
    let server_config = ServerConfig::new()
        .with_bind_address(addr)
        .with_request_logging(server_section.request_logging && !args.quiet_requests);
    let server = Server::new(
        engine.clone(),
        Arc::new(JwtVerifier::new(secret.as_bytes())),
        server_config,
    );

    let listener = tether_server::bind(addr).await?;

    if ctx.verbose {
        println!("Database: {}", database.display());
    }
    println!("tether server starting on http://{}", addr);
    println!("Press Ctrl+C to stop");

    server.serve(listener, shutdown_signal()).await?;

    // ── Graceful shutdown ──────────────────────────────────────────────

    cancel.cancel();
    if let Err(e) = maintenance.await {
        warn!(error = %e, "Maintenance task ended abnormally");
    }

    let flushed = engine
        .shutdown()
        .await
        .context("failed to flush pending session writes")?;
    if ctx.verbose {
        println!("Flushed {} pending session write(s)", flushed);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
