use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::backend::BackendClient;
use crate::config::{Config, SlackTokens};
use crate::notification::{self, NotificationState};
use crate::platform::slack::SlackClient;
use crate::platform::socket_mode::SocketModeHandler;
use crate::platform::ChatPlatform;
use crate::relay::EventRelay;

/// Wire everything together and run until Ctrl-C / SIGTERM.
///
/// Startup order: register the notification endpoint, connect socket mode,
/// sync display names, then serve HTTP. Any failure before serving aborts.
pub async fn run(config: Config, tokens: SlackTokens) -> Result<()> {
    let http = reqwest::Client::new();

    let backend = Arc::new(BackendClient::new(http.clone(), config.backend.endpoint()));
    let slack = Arc::new(SlackClient::new(
        http,
        &config.slack.api_base_url,
        &tokens.bot,
    ));
    let chat: Arc<dyn ChatPlatform> = slack.clone();
    let relay = Arc::new(EventRelay::new(backend.clone(), chat.clone()));

    let listener = tokio::net::TcpListener::bind(&config.notification.listen_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.notification.listen_address))?;
    info!("Listening on {}", config.notification.listen_address);

    backend
        .register_endpoint(&config.notification.url)
        .await
        .context("Failed to register the notification endpoint with the backend")?;

    let socket_mode = SocketModeHandler::start(slack, &tokens.app, relay.clone()).await?;

    if let Err(e) = relay.sync_all_users().await {
        error!("Display name sync aborted: {}", e);
    }

    let app = notification::router(NotificationState::new(
        chat,
        &config.notification.channel,
    ));

    info!("Bot is running");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    socket_mode.stop().await;
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown requested");
}
