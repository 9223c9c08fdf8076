//! # farmlink-server
//!
//! Realtime presence and messaging server for the FarmLink chat.
//!
//! - **Connection registry** mapping each online user to its single live
//!   socket, with versioned snapshots
//! - **Presence broadcaster** announcing the online set on every change
//! - **Message relay** that persists a message, then pushes it to the
//!   recipient if connected
//! - **Typing channel** forwarding ephemeral typing indicators
//! - **REST API** (axum) for the directory, history and sending, plus the
//!   `/ws` socket endpoint
//! - **Per-user rate limiting** on sends and typing events

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod presence;
pub mod rate_limit;
pub mod registry;
pub mod relay;
pub mod store;
pub mod typing;
pub mod ws;

pub use api::{build_router, serve, AppState};
pub use config::ServerConfig;
