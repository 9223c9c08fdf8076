//! # farmlink-shared
//!
//! Types shared by the FarmLink chat server and its clients: user and
//! message records, the socket wire protocol, and protocol constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use types::{DirectoryListing, Identity, Message, MessageId, Role, User, UserId};
