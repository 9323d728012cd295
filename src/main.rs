mod backend;
mod bot;
mod config;
mod error;
mod notification;
mod platform;
mod relay;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, SlackTokens};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,niancat_slack=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());

    // Configuration problems end the process before anything touches the network.
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };
    let tokens = match SlackTokens::load(&config.slack) {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    info!("Configuration loaded successfully");
    info!("  Backend: {}", config.backend.base_url);
    info!("  Team: {}", config.backend.team);
    info!("  Notification channel: {}", config.notification.channel);
    info!("  Notification URL: {}", config.notification.url);

    bot::run(config, tokens)
        .await
        .context("niancat-slack stopped with an error")?;

    Ok(())
}
