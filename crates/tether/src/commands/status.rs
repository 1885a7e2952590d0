//! Status command - checks server health.

use anyhow::Result;

use super::Context;

/// Run the status command.
pub async fn run(ctx: &Context) -> Result<()> {
    let client = ctx.client(None)?;

    match client.health().await {
        Ok(health) => {
            if ctx.json_output {
                println!(
                    "{}",
                    serde_json::json!({
                        "server": ctx.server_url,
                        "status": health.status,
                        "version": health.version,
                        "cachedSessions": health.cached_sessions,
                        "pendingWrites": health.pending_writes,
                    })
                );
            } else {
                println!("Server: {}", ctx.server_url);
                println!("Status: {} (v{})", health.status, health.version);
                println!(
                    "Sessions: {} cached, {} writes pending",
                    health.cached_sessions, health.pending_writes
                );
            }
            Ok(())
        }
        Err(e) => {
            if ctx.json_output {
                println!(
                    "{}",
                    serde_json::json!({ "server": ctx.server_url, "status": "unreachable" })
                );
            } else {
                eprintln!("Server {} unreachable: {}", ctx.server_url, e);
            }
            Err(e.into())
        }
    }
}
