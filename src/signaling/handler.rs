//! WebSocket upgrade handler for the signaling relay

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::util::rate_limit::SignalRateLimiter;

use super::protocol::{ClientId, SignalServerMsg};
use super::relay::SignalingRelay;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let relay = state.relay.clone();
    let rate_limit = state.config.signal_rate_limit;
    ws.on_upgrade(move |socket| handle_socket(socket, relay, rate_limit))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, relay: Arc<SignalingRelay>, rate_limit: u32) {
    let (client_id, outbound_rx) = relay.connect();
    info!(client_id = %client_id, "New signaling connection");

    let (ws_sink, ws_stream) = socket.split();

    run_session(&relay, &client_id, ws_sink, ws_stream, outbound_rx, rate_limit).await;

    // Cleanup on disconnect
    relay.disconnect(&client_id);

    info!(client_id = %client_id, "Signaling connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    relay: &SignalingRelay,
    client_id: &ClientId,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut outbound_rx: mpsc::UnboundedReceiver<SignalServerMsg>,
    rate_limit: u32,
) {
    let rate_limiter = SignalRateLimiter::new(rate_limit);

    // Spawn writer task: relay deliveries -> WebSocket
    let writer_client_id = client_id.clone();
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(client_id = %writer_client_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Reader loop: WebSocket -> relay
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_frame() {
                    warn!(client_id = %client_id, "Rate limited signaling frame");
                    continue;
                }
                relay.handle_frame(client_id, &text);
            }
            Ok(Message::Binary(_)) => {
                warn!(client_id = %client_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(client_id = %client_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Abort writer task
    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &SignalServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
