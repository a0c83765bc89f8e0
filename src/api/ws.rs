// =============================================================================
// WebSocket handler — push-based snapshot updates
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive an immediate full snapshot,
// then a fresh snapshot whenever the state version has moved, polled every
// 500 ms. The socket is split so the push loop and the receive loop run
// concurrently under one `tokio::select!`. Ping frames are answered with
// Pong; other client frames are ignored.
// =============================================================================

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, Duration};
use tracing::{debug, info};

use crate::api::ApiContext;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<ApiContext>,
) -> impl IntoResponse {
    info!("telemetry WebSocket connection accepted");
    ws.on_upgrade(move |socket| handle_connection(socket, ctx))
}

async fn handle_connection(socket: WebSocket, ctx: ApiContext) {
    let (mut sender, mut receiver) = socket.split();

    // Immediate full snapshot on connect.
    let mut last_version = 0u64;
    if send_snapshot(&mut sender, &ctx, &mut last_version).await.is_err() {
        return;
    }

    let mut ticker = interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            // Push loop: fresh snapshot whenever the version moved.
            _ = ticker.tick() => {
                if ctx.app_state.version() != last_version
                    && send_snapshot(&mut sender, &ctx, &mut last_version).await.is_err()
                {
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // client chatter ignored
                    Some(Err(e)) => {
                        debug!(error = %e, "telemetry WebSocket error");
                        break;
                    }
                }
            }
        }
    }

    info!("telemetry WebSocket disconnected");
}

async fn send_snapshot<S>(
    sender: &mut S,
    ctx: &ApiContext,
    last_version: &mut u64,
) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let snapshot = ctx.app_state.build_snapshot(ctx.clock.now_ns());
    *last_version = snapshot.state_version;

    match serde_json::to_string(&snapshot) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            // Serialisation errors are not network errors; keep the socket.
            debug!(error = %e, "snapshot serialisation failed");
            Ok(())
        }
    }
}
