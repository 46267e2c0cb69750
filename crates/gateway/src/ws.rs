//! Client wire protocol endpoint (spec.md §6): `GET /v1/ws` upgrades to a
//! WebSocket and bridges it to one `rl_broker::Connection` for the
//! lifetime of the socket, the same split-sink-and-stream shape the
//! teacher's node WebSocket uses for its own connections.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use rl_broker::wire::InboundMessage;

use crate::state::AppState;

/// `GET /v1/ws` — upgrade to WebSocket. One [`rl_broker::Connection`] per
/// socket; the wire protocol itself (message shapes, `new_session`/
/// `query`/`cancel`/...) is entirely owned by the broker crate.
pub async fn client_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (connection, mut outbound_rx) = state.broker.accept();

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(err) => {
                    tracing::error!(error = %err, "failed to serialize outbound wire message");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<InboundMessage>(&text) {
                Ok(inbound) => connection.handle(inbound).await,
                Err(err) => {
                    tracing::debug!(error = %err, "dropping unparseable inbound message");
                }
            },
            Message::Close(_) => break,
            // axum answers Ping/Pong at the WS level automatically.
            _ => {}
        }
    }

    connection.on_close().await;
    writer.abort();
}
