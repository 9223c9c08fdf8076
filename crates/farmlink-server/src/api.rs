use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use farmlink_shared::constants::WS_PATH;
use farmlink_shared::protocol::{PresenceSnapshot, SendMessageRequest};
use farmlink_shared::{DirectoryListing, Message, UserId};
use farmlink_store::ChatStore;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::CurrentUser;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::presence::PresenceBroadcaster;
use crate::rate_limit::RateLimiter;
use crate::registry::ConnectionRegistry;
use crate::relay::MessageRelay;
use crate::store::with_store;
use crate::typing::TypingChannel;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: PresenceBroadcaster,
    pub relay: MessageRelay,
    pub typing: TypingChannel,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire every subsystem around one store and one registry.
    pub fn new(store: Arc<dyn ChatStore>, config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            presence: PresenceBroadcaster::new(registry.clone()),
            relay: MessageRelay::new(store.clone(), registry.clone()),
            typing: TypingChannel::new(registry.clone()),
            rate_limiter: RateLimiter::new(config.send_rate_per_sec, config.send_burst),
            config: Arc::new(config),
            store,
            registry,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = match state.config.client_url.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new().allow_origin(origin),
        Err(_) => {
            warn!(value = %state.config.client_url, "Invalid CLIENT_URL, allowing any origin");
            CorsLayer::new().allow_origin(Any)
        }
    }
    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
    .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route(WS_PATH, get(ws::ws_upgrade))
        .route("/api/messages/users", get(list_users))
        .route("/api/messages/:id", get(get_messages))
        .route("/api/messages/send/:id", post(send_message))
        .route("/api/presence", get(presence_snapshot))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    online: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        online: state.registry.len(),
    })
}

/// Everyone except the caller, grouped by role.
async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<DirectoryListing>, ServerError> {
    let viewer = user.id().clone();
    let users = with_store(&state.store, move |s| s.list_users_except(&viewer)).await?;
    Ok(Json(DirectoryListing::from_users(users)))
}

async fn get_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(counterpart): Path<String>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let history = state
        .relay
        .history(user.id(), &UserId::new(counterpart))
        .await?;
    Ok(Json(history))
}

async fn send_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(recipient): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    if !state.rate_limiter.check(user.id()).await {
        return Err(ServerError::RateLimited);
    }

    let message = state
        .relay
        .send(user.id(), &UserId::new(recipient), &body.text)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn presence_snapshot(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Json<PresenceSnapshot> {
    let snapshot = state.registry.snapshot();
    Json(PresenceSnapshot {
        version: snapshot.version,
        online_users: snapshot.online,
    })
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use farmlink_shared::constants::USER_ID_HEADER;
    use farmlink_shared::{Role, User};
    use farmlink_store::{Database, SharedDatabase};
    use tower::ServiceExt;

    use super::*;

    fn test_state(config: ServerConfig) -> AppState {
        let shared = SharedDatabase::new(Database::open_in_memory().unwrap());
        for (id, name, role) in [
            ("farmer-1", "Aline", Role::Farmer),
            ("farmer-2", "Bruno", Role::Farmer),
            ("admin-1", "Support", Role::Admin),
        ] {
            shared
                .upsert_user(&User {
                    id: id.into(),
                    name: name.into(),
                    role,
                    email: None,
                })
                .unwrap();
        }
        AppState::new(Arc::new(shared), config)
    }

    fn get(uri: &str, user: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().uri(uri);
        if let Some(user) = user {
            req = req.header(USER_ID_HEADER, user);
        }
        req.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, user: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(USER_ID_HEADER, user)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(test_state(ServerConfig::default()));
        let resp = app.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_or_unknown_identity_is_unauthorized() {
        let app = build_router(test_state(ServerConfig::default()));

        let resp = app.clone().oneshot(get("/api/messages/users", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app.oneshot(get("/api/messages/users", Some("ghost"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_directory_excludes_caller_and_groups_by_role() {
        let app = build_router(test_state(ServerConfig::default()));
        let resp = app.oneshot(get("/api/messages/users", Some("farmer-1"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let listing: DirectoryListing = serde_json::from_value(json_body(resp).await).unwrap();
        let admin_ids: Vec<_> = listing.admins.iter().map(|u| u.id.as_str()).collect();
        let user_ids: Vec<_> = listing.users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(admin_ids, vec!["admin-1"]);
        assert_eq!(user_ids, vec!["farmer-2"]);
    }

    #[tokio::test]
    async fn test_send_then_fetch_history() {
        let app = build_router(test_state(ServerConfig::default()));

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/messages/send/admin-1",
                "farmer-1",
                serde_json::json!({ "text": "the pump is broken" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let sent = json_body(resp).await;
        assert_eq!(sent["senderId"], "farmer-1");
        assert_eq!(sent["receiverId"], "admin-1");

        let resp = app
            .oneshot(get("/api/messages/farmer-1", Some("admin-1")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let history = json_body(resp).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["id"], sent["id"]);
    }

    #[tokio::test]
    async fn test_send_error_statuses() {
        let app = build_router(test_state(ServerConfig::default()));

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/messages/send/nobody",
                "farmer-1",
                serde_json::json!({ "text": "hello?" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(json_body(resp).await["error"].is_string());

        let resp = app
            .oneshot(post_json(
                "/api/messages/send/admin-1",
                "farmer-1",
                serde_json::json!({ "text": "  " }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_rate_limited() {
        let config = ServerConfig {
            send_rate_per_sec: 0.001,
            send_burst: 1.0,
            ..ServerConfig::default()
        };
        let app = build_router(test_state(config));
        let body = serde_json::json!({ "text": "hi" });

        let first = app
            .clone()
            .oneshot(post_json("/api/messages/send/admin-1", "farmer-1", body.clone()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app
            .oneshot(post_json("/api/messages/send/admin-1", "farmer-1", body))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_presence_endpoint_reports_registry() {
        let state = test_state(ServerConfig::default());
        let (handle, _rx) = crate::registry::ConnectionHandle::new(4);
        state.presence.connect(&"admin-1".into(), handle);

        let app = build_router(state);
        let resp = app.oneshot(get("/api/presence", Some("farmer-1"))).await.unwrap();
        let snap: PresenceSnapshot = serde_json::from_value(json_body(resp).await).unwrap();
        assert_eq!(snap.online_users, vec![UserId::from("admin-1")]);
        assert_eq!(snap.version, 1);
    }
}
