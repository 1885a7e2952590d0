//! Logout command - ends the subject's session and revokes earlier credentials.

use anyhow::Result;
use clap::Args;

use super::Context;

/// Arguments for the logout command.
#[derive(Args, Debug)]
pub struct LogoutArgs {
    /// Bearer credential
    #[arg(long, env = "TETHER_TOKEN")]
    pub token: String,
}

/// Run the logout command.
pub async fn run(args: LogoutArgs, ctx: &Context) -> Result<()> {
    ctx.client(Some(&args.token))?.logout().await?;

    if ctx.json_output {
        println!("{}", serde_json::json!({ "success": true }));
    } else {
        println!("Logged out");
    }
    Ok(())
}
