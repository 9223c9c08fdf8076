//! Store-side input records. Persisted records are the shared
//! [`farmlink_shared::User`] and [`farmlink_shared::Message`] types.

use chrono::{DateTime, Utc};
use farmlink_shared::{MessageId, UserId};

/// A message that has not been stored yet. The store assigns nothing: id
/// and timestamp are fixed by the caller so the persisted record is exactly
/// what was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn now(sender_id: UserId, receiver_id: UserId, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender_id,
            receiver_id,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}
