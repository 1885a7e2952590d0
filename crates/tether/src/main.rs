//! tether - session validity service
//!
//! Main entry point for the tether CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{config, logout, serve, session, status, token};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// tether - session validity service
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Server URL (default: http://localhost:8080)
    #[arg(long, global = true, env = "TETHER_SERVER_URL")]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the session server
    Serve(serve::ServeArgs),

    /// Mint a signed development credential
    Token(token::TokenArgs),

    /// Check server health
    Status,

    /// Show the session of a credential
    Session(session::SessionArgs),

    /// Log a credential's subject out
    Logout(logout::LogoutArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = tether_config::load_config(None)?;
    let logging = loaded.config.logging();

    // Console (human-readable) + daily JSON file. RUST_LOG overrides both filters.
    let filter = if cli.verbose {
        "tether=debug,tether_session=debug,tether_server=debug,tether_client=debug,info".to_string()
    } else {
        logging.filter.clone()
    };

    let log_dir = logging
        .directory
        .clone()
        .or_else(|| tether_config::user_config_dir().map(|d| d.join("logs")))
        .unwrap_or_else(|| std::path::PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tether.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(env_filter_or(&filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(env_filter_or(
                    "tether=trace,tether_session=trace,tether_server=trace,tether_client=trace,info",
                )),
        )
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let server_url = cli
        .server
        .unwrap_or_else(|| "http://localhost:8080".to_string());

    let ctx = commands::Context {
        server_url,
        json_output: cli.json,
        verbose: cli.verbose,
        config: loaded,
    };

    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Token(args) => token::run(args, &ctx).await,
        Commands::Status => status::run(&ctx).await,
        Commands::Session(args) => session::run(args, &ctx).await,
        Commands::Logout(args) => logout::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}

fn env_filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::try_parse_from(["tether", "serve", "--bind", "0.0.0.0:9000", "--no-warm-cache"])
            .unwrap();
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.bind.unwrap().port(), 9000);
                assert!(args.no_warm_cache);
            }
            _ => panic!("expected serve"),
        }
    }
}
