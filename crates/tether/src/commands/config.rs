//! Config command - configuration management.

use anyhow::Result;
use clap::{Args, Subcommand};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration and the files it came from
    Show,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./tether.toml) instead of user config
        #[arg(long)]
        local: bool,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Init { local } => cmd_init(local),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.config;
    let config = &loaded.config;
    let engine = config.engine_config()?;
    let server = config.server();

    if ctx.json_output {
        let mut redacted = config.clone();
        if let Some(server) = redacted.server.as_mut()
            && server.jwt_secret.is_some()
        {
            server.jwt_secret = Some("<redacted>".to_string());
        }
        println!("{}", serde_json::to_string_pretty(&redacted)?);
        return Ok(());
    }

    println!("# tether Configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    println!("Session:");
    println!("  inactivity timeout  {:?}", engine.inactivity_timeout);
    println!("  store timeout       {:?}", engine.store_timeout);
    println!("  flush interval      {:?}", engine.flush_interval);
    println!("  ledger ttl          {:?}", engine.ledger_ttl);
    println!("  cleanup interval    {:?}", engine.cleanup_interval);
    println!(
        "  warm cache          {}",
        config.maintenance().warm_cache_on_start
    );
    println!();

    println!("Server:");
    println!("  bind                {}", server.bind_address);
    println!("  request logging     {}", server.request_logging);
    let secret = if config.jwt_secret().is_ok() {
        "configured"
    } else {
        "missing"
    };
    println!("  jwt secret          {}", secret);
    println!();

    match config.database_path() {
        Ok(path) => println!("Database: {}", path.display()),
        Err(e) => println!("Database: {}", e),
    }

    for warning in &loaded.warnings {
        println!("warning: {}", warning);
    }
    Ok(())
}

fn cmd_init(local: bool) -> Result<()> {
    let path = if local {
        std::path::PathBuf::from("tether.toml")
    } else {
        let dir = tether_config::user_config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        std::fs::create_dir_all(&dir)?;
        dir.join("config.toml")
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    let template = r#"# tether Configuration

[session]
inactivity_timeout_secs = 1800
store_timeout_ms = 5000

[sync]
flush_interval_secs = 60

[ledger]
# Keep above the longest credential lifetime
ttl_secs = 604800

[maintenance]
cleanup_interval_secs = 900
warm_cache_on_start = true

[server]
bind_address = "127.0.0.1:8080"
request_logging = true
# Prefer the TETHER_JWT_SECRET environment variable
# jwt_secret = "change-me"

# [storage]
# database_path = "/var/lib/tether/tether.db"

# [logging]
# filter = "info"
# directory = "/var/log/tether"
"#;

    std::fs::write(&path, template)?;
    println!("Created config file: {}", path.display());
    Ok(())
}
