//! WebSocket stream of ledger events
//!
//! `GET /api/events` with an upgrade header. Every [`LedgerEvent`] is pushed
//! as a JSON text frame:
//!
//! ```json
//! {"type":"post_created","post":{"id":1,"contentRef":"bafkrei...",...}}
//! {"type":"tag_registered","tag":"rust","first_post":1}
//! ```
//!
//! Clients may send `{"type":"ping"}` and get a heartbeat back. Heartbeats
//! are also sent unprompted every [`HEARTBEAT_INTERVAL`].

use crate::error::StorageError;
use crate::events::{EventBus, LedgerEvent};
use crate::response::HandlerResult;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::{Request, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Messages from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}

/// Messages from server to client besides ledger events
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Heartbeat { timestamp: String },
}

impl ServerMessage {
    fn heartbeat() -> Self {
        ServerMessage::Heartbeat {
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub fn is_websocket_upgrade<B>(req: &Request<B>) -> bool {
    hyper_tungstenite::is_upgrade_request(req)
}

/// Complete the handshake and hand the connection to a background task
pub fn handle_events_upgrade<B>(mut req: Request<B>, events: Arc<EventBus>) -> HandlerResult {
    let (response, websocket) = hyper_tungstenite::upgrade(&mut req, None)
        .map_err(|e| StorageError::InvalidInput(format!("WebSocket upgrade failed: {}", e)))?;

    // Subscribe before returning so no event between handshake and task start is lost
    let receiver = events.subscribe();

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => {
                if let Err(e) = handle_connection(ws, receiver).await {
                    warn!(error = %e, "Event stream closed with error");
                }
            }
            Err(e) => {
                error!(error = %e, "WebSocket upgrade failed");
            }
        }
    });

    let (parts, _) = response.into_parts();
    Ok(Response::from_parts(parts, Full::new(Bytes::new())))
}

async fn handle_connection<S>(
    ws_stream: WebSocketStream<S>,
    mut events_rx: broadcast::Receiver<LedgerEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut heartbeat_timer = tokio::time::interval(HEARTBEAT_INTERVAL);

    info!("Event stream client connected");

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Ping) => {
                                let json = serde_json::to_string(&ServerMessage::heartbeat())?;
                                ws_sink.send(WsMessage::Text(json.into())).await?;
                            }
                            Err(e) => {
                                debug!(error = %e, "Ignoring unknown client message");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        ws_sink.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }

            result = events_rx.recv() => {
                match result {
                    Ok(event) => {
                        let json = serde_json::to_string(&event)?;
                        if let Err(e) = ws_sink.send(WsMessage::Text(json.into())).await {
                            warn!(error = %e, "Failed to push event");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Event stream client lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = heartbeat_timer.tick() => {
                let json = serde_json::to_string(&ServerMessage::heartbeat())?;
                if let Err(e) = ws_sink.send(WsMessage::Text(json.into())).await {
                    warn!(error = %e, "Failed to send heartbeat");
                    break;
                }
            }
        }
    }

    info!("Event stream client disconnected");
    Ok(())
}
