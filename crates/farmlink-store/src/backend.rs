//! Collaborator traits consumed by the chat server.
//!
//! The server only ever needs two things from persistence: a user directory
//! and a message log. Both are synchronous; async callers move them onto a
//! blocking thread.

use std::sync::{Arc, Mutex};

use farmlink_shared::{Message, User, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::NewMessage;

pub trait UserDirectory: Send + Sync {
    fn find_user(&self, id: &UserId) -> Result<Option<User>>;

    fn list_users_except(&self, id: &UserId) -> Result<Vec<User>>;
}

pub trait MessageStore: Send + Sync {
    fn insert_message(&self, message: &NewMessage) -> Result<Message>;

    fn messages_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>>;
}

/// Everything the server needs from persistence.
pub trait ChatStore: UserDirectory + MessageStore {}

impl<T: UserDirectory + MessageStore> ChatStore for T {}

/// A [`Database`] shared between threads behind a mutex.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` with exclusive access to the database.
    pub fn with<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let guard = self
            .inner
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))?;
        f(&guard)
    }

    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.with(|db| db.upsert_user(user))
    }
}

impl UserDirectory for SharedDatabase {
    fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        self.with(|db| db.find_user(id))
    }

    fn list_users_except(&self, id: &UserId) -> Result<Vec<User>> {
        self.with(|db| db.list_users_except(id))
    }
}

impl MessageStore for SharedDatabase {
    fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        self.with(|db| db.insert_message(message))
    }

    fn messages_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        self.with(|db| db.messages_between(a, b))
    }
}
