//! Slack socket mode transport.
//!
//! Slack pushes events over a WebSocket obtained from `apps.connections.open`.
//! Every envelope carrying an `envelope_id` must be acknowledged within a few
//! seconds, so acks are written straight away and the actual handling runs on
//! its own task. A `disconnect` envelope (Slack rotates connections
//! periodically) or a dropped socket triggers a reconnect.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::slack::SlackClient;
use super::SlashCommand;
use crate::relay::{command_acknowledgement, EventRelay};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    reason: Option<String>,
}

/// What to do with one inbound frame.
#[derive(Debug, Default, PartialEq)]
struct FramePlan {
    ack: Option<String>,
    event: Option<Value>,
    reconnect: bool,
}

fn plan_frame(text: &str) -> Result<FramePlan, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let mut plan = FramePlan::default();
    let mut ack_payload = None;

    match envelope.kind.as_str() {
        "hello" => debug!("Socket mode hello received"),
        "disconnect" => {
            info!(
                "Slack requested disconnect: {}",
                envelope.reason.as_deref().unwrap_or("no reason given")
            );
            plan.reconnect = true;
        }
        "events_api" => match envelope.payload.get("event") {
            Some(event) => plan.event = Some(event.clone()),
            None => warn!("events_api envelope without an event"),
        },
        "slash_commands" => match serde_json::from_value::<SlashCommand>(envelope.payload) {
            Ok(command) => {
                ack_payload = command_acknowledgement(&command).map(|text| json!({ "text": text }));
            }
            Err(e) => warn!("Unreadable slash command payload: {}", e),
        },
        other => debug!("Acknowledging unhandled envelope type {}", other),
    }

    if let Some(envelope_id) = envelope.envelope_id {
        let ack = match ack_payload {
            Some(payload) => json!({ "envelope_id": envelope_id, "payload": payload }),
            None => json!({ "envelope_id": envelope_id }),
        };
        plan.ack = Some(ack.to_string());
    }

    Ok(plan)
}

struct Connector {
    slack: Arc<SlackClient>,
    app_token: String,
}

impl Connector {
    async fn connect(&self) -> Result<WsStream> {
        let url = self
            .slack
            .open_connection(&self.app_token)
            .await
            .context("Failed to open a socket mode connection")?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .context("Failed to connect to the socket mode WebSocket")?;
        Ok(stream)
    }
}

enum ConnectionEnd {
    Shutdown,
    Reconnect,
}

/// Running socket mode transport. Dropping it without `stop` also ends the loop.
pub struct SocketModeHandler {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SocketModeHandler {
    /// Connect once (failure aborts startup) and start dispatching events to `relay`.
    pub async fn start(
        slack: Arc<SlackClient>,
        app_token: &str,
        relay: Arc<EventRelay>,
    ) -> Result<Self> {
        let connector = Connector {
            slack,
            app_token: app_token.to_string(),
        };
        let stream = connector.connect().await?;
        info!("Socket mode connected");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(connector, relay, stream, shutdown_rx));

        Ok(Self { shutdown_tx, task })
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!("Socket mode task ended abnormally: {}", e);
        }
        info!("Socket mode stopped");
    }
}

async fn run_loop(
    connector: Connector,
    relay: Arc<EventRelay>,
    mut stream: WsStream,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        let end = serve_connection(&mut stream, &relay, &mut shutdown_rx).await;
        if let ConnectionEnd::Shutdown = end {
            let _ = stream.close(None).await;
            return;
        }

        info!("Socket mode connection ended, reconnecting");
        stream = loop {
            let connected = tokio::select! {
                _ = &mut shutdown_rx => return,
                connected = connector.connect() => connected,
            };
            match connected {
                Ok(stream) => break stream,
                Err(e) => {
                    error!("Socket mode reconnect failed: {:#}", e);
                    tokio::select! {
                        _ = &mut shutdown_rx => return,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        };
        info!("Socket mode reconnected");
    }
}

async fn serve_connection(
    stream: &mut WsStream,
    relay: &Arc<EventRelay>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> ConnectionEnd {
    loop {
        let frame = tokio::select! {
            _ = &mut *shutdown_rx => return ConnectionEnd::Shutdown,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                let plan = match plan_frame(&text) {
                    Ok(plan) => plan,
                    Err(e) => {
                        warn!("Unreadable socket mode frame: {}", e);
                        continue;
                    }
                };

                if let Some(ack) = plan.ack {
                    if let Err(e) = stream.send(Message::Text(ack)).await {
                        warn!("Failed to acknowledge envelope: {}", e);
                        return ConnectionEnd::Reconnect;
                    }
                }

                if let Some(event) = plan.event {
                    let relay = Arc::clone(relay);
                    tokio::spawn(async move {
                        if let Err(e) = relay.dispatch(&event).await {
                            error!("Event handler failed: {}", e);
                        }
                    });
                }

                if plan.reconnect {
                    return ConnectionEnd::Reconnect;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                info!("Socket closed by Slack: {:?}", frame);
                return ConnectionEnd::Reconnect;
            }
            // Pings are answered by tungstenite itself.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("Socket mode read error: {}", e);
                return ConnectionEnd::Reconnect;
            }
            None => return ConnectionEnd::Reconnect,
        }
    }
}
