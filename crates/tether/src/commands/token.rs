//! Token command - mints a signed development credential.

use anyhow::{Context as _, Result};
use chrono::{Duration, Utc};
use clap::Args;
use tether_server::{Claims, issue_token};

use super::Context;

/// Arguments for the token command.
#[derive(Args, Debug)]
pub struct TokenArgs {
    /// Subject id to issue the credential for
    pub subject: String,

    /// Lifetime in seconds
    #[arg(long, default_value_t = 3600)]
    pub ttl_secs: i64,

    /// Email claim
    #[arg(long)]
    pub email: Option<String>,

    /// Display name claim
    #[arg(long)]
    pub name: Option<String>,
}

/// Run the token command.
pub async fn run(args: TokenArgs, ctx: &Context) -> Result<()> {
    let secret = ctx
        .config
        .config
        .jwt_secret()
        .with_context(|| format!("set {} or [server] jwt_secret", tether_config::JWT_SECRET_ENV))?;
    if args.ttl_secs <= 0 {
        anyhow::bail!("--ttl-secs must be positive");
    }

    let mut claims = Claims::new(&args.subject, Utc::now(), Duration::seconds(args.ttl_secs));
    claims.email = args.email;
    claims.name = args.name;
    let token = issue_token(secret.as_bytes(), &claims)?;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::json!({
                "token": token,
                "subject": claims.sub,
                "expiresAt": claims.exp,
            })
        );
    } else {
        println!("{}", token);
    }
    Ok(())
}
