//! # farmlink-client
//!
//! Client-side session logic for the FarmLink chat: socket connection with
//! reconnection, presence mirror, conversation loading and de-duplication,
//! typing indicators, and the role-filtered conversation list.
//!
//! The crate is UI-agnostic. An embedding application creates a
//! [`SessionController`], calls [`SessionController::connect`], and re-renders
//! whenever the receiver from [`SessionController::subscribe`] changes.
//! Logging goes through `tracing`; installing a subscriber is up to the
//! embedding binary.

pub mod api;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod projection;
pub mod session;
pub mod typing;

pub use api::{ChatApi, HttpChatApi};
pub use config::ClientConfig;
pub use error::SessionError;
pub use projection::ConversationEntry;
pub use session::{RefreshReport, SessionController, SessionPhase};
