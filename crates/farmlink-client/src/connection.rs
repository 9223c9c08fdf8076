//! Socket transport with reconnection.
//!
//! Runs as one task per session. Every state change and every decoded server
//! event is reported on a [`TransportEvent`] channel; the session controller
//! is the only consumer.

use std::time::Duration;

use farmlink_shared::constants::{CLOSE_REPLACED, CLOSE_UNKNOWN_IDENTITY};
use farmlink_shared::protocol::{ClientEvent, ServerEvent};
use farmlink_shared::ProtocolError;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
pub enum TransportEvent {
    Connecting { attempt: u32 },
    /// Handshake accepted. Outbound client events go through the sender.
    Connected(mpsc::UnboundedSender<ClientEvent>),
    Event(ServerEvent),
    Disconnected { reason: String },
    /// Retries exhausted, identity rejected, or the connection was replaced by
    /// a newer one for the same identity; the task has stopped.
    GaveUp { reason: String },
}

/// How a live session ended.
enum SessionEnd {
    Shutdown,
    Rejected,
    /// The server handed this identity's slot to a newer connection.
    Replaced,
    /// Never got past the handshake.
    Lost(String),
    /// Was connected, then the socket ended.
    Dropped(String),
}

/// Spawn the connection loop. Send `true` on `shutdown` to close the socket
/// and stop the task.
pub fn spawn(
    url: Url,
    config: ClientConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(url, config, events, shutdown))
}

async fn run(
    url: Url,
    config: ClientConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures = 0u32;

    loop {
        if *shutdown.borrow() {
            return;
        }
        let _ = events.send(TransportEvent::Connecting { attempt: failures + 1 });

        let end = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _)) => session(socket, &config, &events, &mut shutdown).await,
            Err(e) => SessionEnd::Lost(format!("connect failed: {e}")),
        };

        match end {
            SessionEnd::Shutdown => {
                let _ = events.send(TransportEvent::Disconnected {
                    reason: "shutdown".into(),
                });
                return;
            }
            SessionEnd::Rejected => {
                error!(url = %url, "Server rejected identity");
                let _ = events.send(TransportEvent::GaveUp {
                    reason: "identity rejected".into(),
                });
                return;
            }
            SessionEnd::Replaced => {
                warn!(url = %url, "Connection replaced by a newer session");
                let _ = events.send(TransportEvent::GaveUp {
                    reason: "replaced by a newer connection".into(),
                });
                return;
            }
            SessionEnd::Lost(reason) => {
                warn!(reason = %reason, "Connection attempt failed");
                let _ = events.send(TransportEvent::Disconnected { reason });
            }
            SessionEnd::Dropped(reason) => {
                warn!(reason = %reason, "Connection lost");
                failures = 0;
                let _ = events.send(TransportEvent::Disconnected { reason });
            }
        }

        failures += 1;
        if failures >= config.reconnect_attempts {
            let _ = events.send(TransportEvent::GaveUp {
                reason: format!("{failures} consecutive failures"),
            });
            return;
        }

        let delay = config.backoff_delay(failures);
        debug!(
            attempt = failures + 1,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Wait for the server's first frame, then pump frames both ways until the
/// socket ends or shutdown is requested.
async fn session(
    mut socket: Socket,
    config: &ClientConfig,
    events: &mpsc::UnboundedSender<TransportEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    // The server answers an accepted handshake with a presence snapshot and
    // a rejected one with a close frame.
    let first = match first_frame(&mut socket, config.handshake_timeout).await {
        Ok(event) => event,
        Err(end) => return end,
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
    info!("Connected");
    let _ = events.send(TransportEvent::Connected(out_tx));
    let _ = events.send(TransportEvent::Event(first));

    loop {
        tokio::select! {
            incoming = socket.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => match ServerEvent::from_json(&text) {
                    Ok(event) => {
                        let _ = events.send(TransportEvent::Event(event));
                    }
                    Err(e) => warn!(error = %e, "Ignoring malformed server frame"),
                },
                Some(Ok(WsMessage::Binary(_))) => {
                    let e = ProtocolError::Unsupported("binary frame");
                    warn!(error = %e, "Ignoring server frame");
                }
                Some(Ok(WsMessage::Close(Some(close))))
                    if u16::from(close.code) == CLOSE_REPLACED =>
                {
                    return SessionEnd::Replaced;
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    return SessionEnd::Dropped(format!("server closed: {frame:?}"));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                None => return SessionEnd::Dropped("stream ended".into()),
            },
            Some(event) = out_rx.recv() => {
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode client event");
                        continue;
                    }
                };
                if let Err(e) = socket.send(WsMessage::Text(text)).await {
                    return SessionEnd::Dropped(e.to_string());
                }
            }
            _ = shutdown.changed() => {
                let _ = socket
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "logout".into(),
                    })))
                    .await;
                return SessionEnd::Shutdown;
            }
        }
    }
}

async fn first_frame(socket: &mut Socket, wait: Duration) -> Result<ServerEvent, SessionEnd> {
    loop {
        let frame = match tokio::time::timeout(wait, socket.next()).await {
            Ok(frame) => frame,
            Err(_) => return Err(SessionEnd::Lost("handshake timed out".into())),
        };
        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                return ServerEvent::from_json(&text)
                    .map_err(|e| SessionEnd::Lost(format!("bad first frame: {e}")));
            }
            Some(Ok(WsMessage::Close(Some(close))))
                if u16::from(close.code) == CLOSE_UNKNOWN_IDENTITY =>
            {
                return Err(SessionEnd::Rejected);
            }
            Some(Ok(WsMessage::Close(Some(close))))
                if u16::from(close.code) == CLOSE_REPLACED =>
            {
                return Err(SessionEnd::Replaced);
            }
            Some(Ok(WsMessage::Close(frame))) => {
                return Err(SessionEnd::Lost(format!("closed during handshake: {frame:?}")));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(SessionEnd::Lost(e.to_string())),
            None => return Err(SessionEnd::Lost("stream ended during handshake".into())),
        }
    }
}
