//! Typing indicator forwarding. Ephemeral: nothing is stored and an offline
//! recipient simply never hears about it.

use std::sync::Arc;

use farmlink_shared::protocol::{ServerEvent, TypingNotice};
use farmlink_shared::UserId;
use tracing::trace;

use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct TypingChannel {
    registry: Arc<ConnectionRegistry>,
}

impl TypingChannel {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Forward `sender`'s typing state to `recipient` if online. Returns
    /// whether the event was queued.
    pub fn notify(&self, sender: &UserId, recipient: &UserId, is_typing: bool) -> bool {
        let Some(conn) = self.registry.lookup(recipient) else {
            trace!(from = %sender, to = %recipient, "Typing target offline");
            return false;
        };

        let event = ServerEvent::TypingStatus(TypingNotice {
            sender_id: sender.clone(),
            is_typing,
        });
        conn.push(event).is_ok()
    }
}
