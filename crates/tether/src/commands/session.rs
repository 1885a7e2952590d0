//! Session command - shows the caller's session window.

use anyhow::Result;
use clap::Args;

use super::Context;

/// Arguments for the session command.
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Bearer credential
    #[arg(long, env = "TETHER_TOKEN")]
    pub token: String,
}

/// Run the session command.
pub async fn run(args: SessionArgs, ctx: &Context) -> Result<()> {
    let client = ctx.client(Some(&args.token))?;
    let info = client.session().await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Subject:       {}", info.subject_id);
    if let Some(email) = &info.email {
        println!("Email:         {}", email);
    }
    if let Some(name) = &info.display_name {
        println!("Name:          {}", name);
    }
    println!("Session:       {}", info.session_id);
    println!("Created:       {}", info.created_at);
    println!("Last activity: {}", info.last_activity_at);
    println!("Expires:       {}", info.expires_at);
    Ok(())
}
