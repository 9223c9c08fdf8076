//! Message relay: persist first, then push to the recipient if online.
//!
//! The store write is the durability point. Everything after it is best
//! effort: an offline or slow recipient simply picks the message up on its
//! next history fetch. The sender is never pushed its own message; it uses
//! the returned record.

use std::sync::Arc;

use farmlink_shared::constants::MAX_MESSAGE_LEN;
use farmlink_shared::protocol::ServerEvent;
use farmlink_shared::{Message, UserId};
use farmlink_store::{ChatStore, NewMessage, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::registry::ConnectionRegistry;
use crate::store::with_store;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Recipient not found: {0}")]
    NotFound(UserId),

    #[error("Invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("Failed to persist message: {0}")]
    Persistence(#[from] StoreError),
}

#[derive(Clone)]
pub struct MessageRelay {
    store: Arc<dyn ChatStore>,
    registry: Arc<ConnectionRegistry>,
}

impl MessageRelay {
    pub fn new(store: Arc<dyn ChatStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn send(
        &self,
        sender: &UserId,
        recipient: &UserId,
        text: &str,
    ) -> Result<Message, RelayError> {
        validate_text(text)?;

        let lookup_id = recipient.clone();
        let found = with_store(&self.store, move |s| s.find_user(&lookup_id)).await?;
        if found.is_none() {
            return Err(RelayError::NotFound(recipient.clone()));
        }

        let new = NewMessage::now(sender.clone(), recipient.clone(), text);
        let message = with_store(&self.store, move |s| s.insert_message(&new)).await?;

        info!(
            msg_id = %message.id,
            from = %message.sender_id,
            to = %message.receiver_id,
            "Message stored"
        );

        self.deliver(&message);
        Ok(message)
    }

    /// Messages between `viewer` and `counterpart`, oldest first.
    pub async fn history(
        &self,
        viewer: &UserId,
        counterpart: &UserId,
    ) -> Result<Vec<Message>, RelayError> {
        let (a, b) = (viewer.clone(), counterpart.clone());
        Ok(with_store(&self.store, move |s| s.messages_between(&a, &b)).await?)
    }

    /// Push to the recipient's live connection. Returns whether the event
    /// was queued; a miss never affects the stored message.
    fn deliver(&self, message: &Message) -> bool {
        let Some(conn) = self.registry.lookup(&message.receiver_id) else {
            debug!(
                msg_id = %message.id,
                to = %message.receiver_id,
                "Recipient offline, stored only"
            );
            return false;
        };

        match conn.push(ServerEvent::NewMessage(message.clone())) {
            Ok(()) => {
                debug!(msg_id = %message.id, conn = conn.id(), "Message pushed");
                true
            }
            Err(e) => {
                warn!(
                    msg_id = %message.id,
                    conn = conn.id(),
                    error = %e,
                    "Push failed, recipient will fetch later"
                );
                false
            }
        }
    }
}

fn validate_text(text: &str) -> Result<(), RelayError> {
    if text.trim().is_empty() {
        return Err(RelayError::InvalidMessage("message text is empty"));
    }
    if text.chars().count() > MAX_MESSAGE_LEN {
        return Err(RelayError::InvalidMessage("message text is too long"));
    }
    Ok(())
}
