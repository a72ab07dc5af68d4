//! CLI entry point for the Telegram gateway.
//!
//! Loads configuration, bootstraps the bridge pool and registry, and serves
//! the four fixed-port HTTP surfaces plus the admin dashboard until signalled
//! to shut down.

mod config;
mod platform;
mod telegram_session;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::GatewayConfig;
use crate::platform::Platform;

/// Overrides for the environment-variable-driven configuration in
/// [`config::GatewayConfig::load`] — everything still has an env var, this
/// just lets an operator override it without exporting one.
#[derive(Debug, Parser)]
#[command(name = "tgmux", about = "Multi-account Telegram gateway")]
struct Cli {
    /// Path to the accounts TOML file (overrides ACCOUNTS_FILE).
    #[arg(long)]
    accounts_file: Option<String>,

    /// Tracing filter directive (overrides LOG_LEVEL).
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Some(path) = &cli.accounts_file {
        unsafe { std::env::set_var("ACCOUNTS_FILE", path) };
    }
    if let Some(level) = &cli.log_level {
        unsafe { std::env::set_var("LOG_LEVEL", level) };
    }

    let config = GatewayConfig::load()?;
    init_tracing(&config.log_level);

    tracing::info!(accounts = config.bridges.len() / tgmux_protocol::Service::ALL.len(), "loaded accounts file");

    let platform = Platform::bootstrap(&config).await?;
    platform.spawn_background_tasks();

    tgmux_web::WebServer::new(platform.state).start().await
}
