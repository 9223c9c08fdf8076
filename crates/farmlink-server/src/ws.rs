//! Socket endpoint: `GET /ws?userId=<id>`.
//!
//! Each accepted socket becomes a small actor. A writer task owns the sink
//! and drains the connection's event queue, a keepalive task pings the
//! client, and the handler itself reads client events until the socket ends.

use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use farmlink_shared::constants::{
    CLOSE_REPLACED, CLOSE_UNKNOWN_IDENTITY, PING_INTERVAL_SECS, PONG_TIMEOUT_SECS,
    WS_IDENTITY_PARAM,
};
use farmlink_shared::protocol::{ClientEvent, ServerEvent};
use farmlink_shared::{User, UserId};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::registry::ConnectionHandle;
use crate::store::with_store;

const PING_INTERVAL: Duration = Duration::from_secs(PING_INTERVAL_SECS);
const PONG_TIMEOUT: Duration = Duration::from_secs(PONG_TIMEOUT_SECS);

#[derive(Debug, Deserialize)]
pub struct WsIdentityQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// Upgrade, then either run the connection or close it straight away with
/// an application close code.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsIdentityQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match resolve_identity(&state, params.user_id).await {
        Ok(user) => {
            info!(user = %user.id, role = user.role.as_str(), "WebSocket handshake accepted");
            ws.on_upgrade(move |socket| run_connection(socket, state, user))
        }
        Err((code, reason)) => {
            warn!(
                close_code = code,
                reason,
                param = WS_IDENTITY_PARAM,
                "WebSocket handshake rejected"
            );
            ws.on_upgrade(move |mut socket| async move {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
            })
        }
    }
}

async fn resolve_identity(
    state: &AppState,
    raw: Option<String>,
) -> Result<User, (u16, &'static str)> {
    let raw = raw
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or((CLOSE_UNKNOWN_IDENTITY, "Missing identity"))?;

    let id = UserId::new(raw);
    match with_store(&state.store, move |s| s.find_user(&id)).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err((CLOSE_UNKNOWN_IDENTITY, "Unknown identity")),
        Err(e) => {
            warn!(error = %e, "Identity lookup failed");
            Err((close_code::ERROR, "Identity lookup failed"))
        }
    }
}

/// Drive one accepted socket until it closes or a newer connection for the
/// same identity replaces it, then release its registry entry.
pub async fn run_connection(socket: WebSocket, state: AppState, user: User) {
    let identity = user.id;
    let (ws_sender, mut ws_receiver) = socket.split();
    let (handle, events) = ConnectionHandle::new(state.config.connection_queue);
    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();

    let mut writer = tokio::spawn(writer_task(ws_sender, events, control_rx));

    // The new socket is part of the snapshot it triggers, so it learns the
    // online set without asking.
    state.presence.connect(&identity, handle.clone());

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let mut keepalive = tokio::spawn(keepalive_task(control_tx.clone(), pong_rx));
    let mut flush_close = false;

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_text(&state, &identity, &handle, &text).await
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!(user = %identity, "Ignoring binary frame");
                }
                Some(Ok(Message::Pong(_))) => {
                    let _ = pong_tx.send(());
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = control_tx.send(Message::Pong(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(user = %identity, reason = ?frame, "Client initiated close");
                    break;
                }
                Some(Err(e)) => {
                    warn!(user = %identity, error = %e, "WebSocket receive error");
                    break;
                }
                None => {
                    info!(user = %identity, "WebSocket stream ended");
                    break;
                }
            },
            _ = &mut keepalive => {
                flush_close = true;
                break;
            }
            _ = handle.superseded() => {
                info!(user = %identity, conn = handle.id(), "Closing replaced connection");
                let _ = control_tx.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_REPLACED,
                    reason: "Replaced by a newer connection".into(),
                })));
                flush_close = true;
                break;
            }
        }
    }

    state.presence.disconnect(&identity, &handle);

    keepalive.abort();
    if flush_close {
        // Let the writer flush the close frame it was handed.
        let _ = timeout(Duration::from_secs(1), &mut writer).await;
    }
    writer.abort();

    info!(user = %identity, conn = handle.id(), "WebSocket actor stopped");
}

async fn handle_text(
    state: &AppState,
    identity: &UserId,
    handle: &ConnectionHandle,
    text: &str,
) {
    match ClientEvent::from_json(text) {
        Ok(ClientEvent::RequestPresenceSnapshot) => {
            let snapshot = state.presence.refresh(handle);
            debug!(user = %identity, version = snapshot.version, "Presence refresh requested");
        }
        Ok(ClientEvent::TypingStatus(update)) => {
            if !state.rate_limiter.check(identity).await {
                return;
            }
            state
                .typing
                .notify(identity, &update.receiver_id, update.is_typing);
        }
        Err(e) => {
            warn!(
                user = %identity,
                error = %e,
                frame = %text.chars().take(100).collect::<String>(),
                "Malformed client event"
            );
        }
    }
}

/// Owns the sink. Control frames (pong, close) go out ahead of queued events.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<ServerEvent>,
    mut control: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            Some(frame) = control.recv() => frame,
            Some(event) = events.recv() => match event.to_json() {
                Ok(text) => Message::Text(text),
                Err(e) => {
                    warn!(event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            },
            else => break,
        };

        let closing = matches!(frame, Message::Close(_));
        if let Err(e) = sink.send(frame).await {
            debug!(error = %e, "WebSocket send failed");
            break;
        }
        if closing {
            break;
        }
    }
}

/// Returns once the client stops answering pings, after queueing a close.
async fn keepalive_task(
    control: mpsc::UnboundedSender<Message>,
    mut pongs: mpsc::UnboundedReceiver<()>,
) {
    let mut ticker = interval(PING_INTERVAL);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        while pongs.try_recv().is_ok() {}
        if control.send(Message::Ping(b"farmlink".to_vec())).is_err() {
            return;
        }

        match timeout(PONG_TIMEOUT, pongs.recv()).await {
            Ok(Some(())) => {}
            _ => {
                warn!("Pong timeout, closing connection");
                let _ = control.send(Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: "Pong timeout".into(),
                })));
                return;
            }
        }
    }
}
