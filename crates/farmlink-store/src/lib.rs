//! # farmlink-store
//!
//! SQLite-backed user directory and message store for the FarmLink chat
//! server.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection`, and the [`UserDirectory`] / [`MessageStore`]
//! traits the server consumes. [`SharedDatabase`] makes one connection
//! usable from many request handlers.

pub mod backend;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use backend::{ChatStore, MessageStore, SharedDatabase, UserDirectory};
pub use database::Database;
pub use error::StoreError;
pub use models::NewMessage;
