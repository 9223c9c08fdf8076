//! End-to-end tests over a real listener: socket handshake, presence,
//! message push and typing forwarding.

use std::sync::Arc;
use std::time::Duration;

use farmlink_server::{build_router, AppState, ServerConfig};
use farmlink_shared::constants::{CLOSE_REPLACED, CLOSE_UNKNOWN_IDENTITY, USER_ID_HEADER};
use farmlink_shared::protocol::{ClientEvent, ServerEvent, TypingUpdate};
use farmlink_shared::{Message, Role, User, UserId};
use farmlink_store::{Database, SharedDatabase};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start the server on a random port backed by a temp-file database.
async fn start_test_server() -> String {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = Database::open_at(&tmp_dir.path().join("chat.db")).expect("Failed to open DB");
    let store = SharedDatabase::new(db);
    for (id, name, role) in [
        ("farmer-1", "Aline", Role::Farmer),
        ("farmer-2", "Bruno", Role::Farmer),
        ("admin-1", "Support", Role::Admin),
    ] {
        store
            .upsert_user(&User {
                id: id.into(),
                name: name.into(),
                role,
                email: None,
            })
            .unwrap();
    }

    let app = build_router(AppState::new(Arc::new(store), ServerConfig::default()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    addr.to_string()
}

async fn connect(addr: &str, user: &str) -> Socket {
    let url = format!("ws://{addr}/ws?userId={user}");
    let (socket, _) = tokio_tungstenite::connect_async(url).await.expect("WS connect failed");
    socket
}

/// Next server event, skipping control frames. `None` on timeout or close.
async fn next_event(socket: &mut Socket, wait: Duration) -> Option<ServerEvent> {
    loop {
        match tokio::time::timeout(wait, socket.next()).await {
            Ok(Some(Ok(WsMessage::Text(text)))) => {
                return Some(ServerEvent::from_json(&text).expect("bad server event"));
            }
            Ok(Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// Wait until a presence snapshot with exactly `expected` arrives.
async fn await_presence(socket: &mut Socket, expected: &[&str]) {
    let expected: Vec<UserId> = expected.iter().map(|s| UserId::from(*s)).collect();
    loop {
        match next_event(socket, Duration::from_secs(2)).await {
            Some(ServerEvent::PresenceSnapshot(snap)) if snap.online_users == expected => return,
            Some(_) => continue,
            None => panic!("no presence snapshot with {expected:?}"),
        }
    }
}

/// Close code of the next close frame, skipping events. `None` on timeout
/// or when the stream ends without one.
async fn close_code(socket: &mut Socket) -> Option<u16> {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), socket.next()).await {
            Ok(Some(Ok(WsMessage::Close(Some(frame))))) => return Some(u16::from(frame.code)),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

/// Drop anything already queued.
async fn drain(socket: &mut Socket) {
    while next_event(socket, Duration::from_millis(200)).await.is_some() {}
}

async fn send_rest(base: &str, from: &str, to: &str, text: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{base}/api/messages/send/{to}"))
        .header(USER_ID_HEADER, from)
        .json(&serde_json::json!({ "text": text }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_presence_tracks_connect_and_disconnect() {
    let addr = start_test_server().await;

    let mut farmer = connect(&addr, "farmer-1").await;
    await_presence(&mut farmer, &["farmer-1"]).await;

    let mut admin = connect(&addr, "admin-1").await;
    await_presence(&mut admin, &["admin-1", "farmer-1"]).await;
    await_presence(&mut farmer, &["admin-1", "farmer-1"]).await;

    admin.close(None).await.unwrap();
    await_presence(&mut farmer, &["farmer-1"]).await;

    let mut admin = connect(&addr, "admin-1").await;
    await_presence(&mut admin, &["admin-1", "farmer-1"]).await;
    await_presence(&mut farmer, &["admin-1", "farmer-1"]).await;
}

#[tokio::test]
async fn test_refresh_request_answers_with_current_snapshot() {
    let addr = start_test_server().await;
    let mut farmer = connect(&addr, "farmer-1").await;
    await_presence(&mut farmer, &["farmer-1"]).await;
    drain(&mut farmer).await;

    let req = ClientEvent::RequestPresenceSnapshot.to_json().unwrap();
    farmer.send(WsMessage::Text(req)).await.unwrap();
    await_presence(&mut farmer, &["farmer-1"]).await;
}

#[tokio::test]
async fn test_message_pushed_to_recipient_only() {
    let addr = start_test_server().await;
    let mut farmer = connect(&addr, "farmer-1").await;
    let mut admin = connect(&addr, "admin-1").await;
    let mut other = connect(&addr, "farmer-2").await;
    await_presence(&mut farmer, &["admin-1", "farmer-1", "farmer-2"]).await;
    drain(&mut farmer).await;
    drain(&mut admin).await;
    drain(&mut other).await;

    let resp = send_rest(&addr, "farmer-1", "admin-1", "cow is sick").await;
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    let stored: Message = resp.json().await.unwrap();

    match next_event(&mut admin, Duration::from_secs(2)).await {
        Some(ServerEvent::NewMessage(m)) => assert_eq!(m, stored),
        other => panic!("expected newMessage, got {other:?}"),
    }
    assert!(next_event(&mut farmer, Duration::from_millis(300)).await.is_none());
    assert!(next_event(&mut other, Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn test_offline_recipient_reads_history_later() {
    let addr = start_test_server().await;

    let resp = send_rest(&addr, "farmer-1", "admin-1", "while you were away").await;
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    let history: Vec<Message> = reqwest::Client::new()
        .get(format!("http://{addr}/api/messages/farmer-1"))
        .header(USER_ID_HEADER, "admin-1")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "while you were away");
}

#[tokio::test]
async fn test_typing_forwarded_with_sender_id() {
    let addr = start_test_server().await;
    let mut farmer = connect(&addr, "farmer-1").await;
    let mut admin = connect(&addr, "admin-1").await;
    await_presence(&mut farmer, &["admin-1", "farmer-1"]).await;
    drain(&mut admin).await;

    let typing = ClientEvent::TypingStatus(TypingUpdate {
        receiver_id: "admin-1".into(),
        is_typing: true,
    });
    farmer.send(WsMessage::Text(typing.to_json().unwrap())).await.unwrap();

    match next_event(&mut admin, Duration::from_secs(2)).await {
        Some(ServerEvent::TypingStatus(notice)) => {
            assert_eq!(notice.sender_id, UserId::from("farmer-1"));
            assert!(notice.is_typing);
        }
        other => panic!("expected typingStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_identity_closed_with_4001() {
    let addr = start_test_server().await;
    let mut socket = connect(&addr, "ghost").await;

    let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("timed out waiting for close");
    match frame {
        Some(Ok(WsMessage::Close(Some(close)))) => {
            assert_eq!(u16::from(close.code), CLOSE_UNKNOWN_IDENTITY);
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_connection_closes_first_with_replaced_code() {
    let addr = start_test_server().await;
    let mut first = connect(&addr, "farmer-1").await;
    await_presence(&mut first, &["farmer-1"]).await;
    let mut second = connect(&addr, "farmer-1").await;
    await_presence(&mut second, &["farmer-1"]).await;

    assert_eq!(close_code(&mut first).await, Some(CLOSE_REPLACED));

    // The replaced socket going away leaves the user online.
    let mut admin = connect(&addr, "admin-1").await;
    await_presence(&mut admin, &["admin-1", "farmer-1"]).await;
    await_presence(&mut second, &["admin-1", "farmer-1"]).await;

    let resp = send_rest(&addr, "admin-1", "farmer-1", "still reachable").await;
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    loop {
        match next_event(&mut second, Duration::from_secs(2)).await {
            Some(ServerEvent::NewMessage(m)) => {
                assert_eq!(m.text, "still reachable");
                break;
            }
            Some(ServerEvent::PresenceSnapshot(snap)) => {
                assert!(snap.online_users.contains(&UserId::from("farmer-1")));
            }
            other => panic!("expected newMessage, got {other:?}"),
        }
    }
}
