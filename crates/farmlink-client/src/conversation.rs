use std::collections::HashSet;

use farmlink_shared::{Message, MessageId};

/// The loaded messages of the active conversation, oldest first, with each
/// message id present at most once.
#[derive(Debug, Default, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_history(history: impl IntoIterator<Item = Message>) -> Self {
        let mut conversation = Self::new();
        conversation.extend(history);
        conversation
    }

    /// Insert keeping `created_at` order. Returns `false` for a message
    /// already present. Equal timestamps keep arrival order.
    pub fn insert(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        true
    }

    /// Returns how many messages were new.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        messages.into_iter().filter(|m| self.insert(m.clone())).count()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn msg(text: &str, offset_secs: i64) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: "a".into(),
            receiver_id: "b".into(),
            text: text.into(),
            created_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn test_duplicate_push_ignored() {
        let first = msg("hello", 0);
        let mut conversation = Conversation::from_history(vec![first.clone()]);

        assert!(!conversation.insert(first.clone()));
        assert!(!conversation.insert(first));
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn test_late_push_lands_in_time_order() {
        let early = msg("early", -10);
        let late = msg("late", 10);
        let middle = msg("middle", 0);

        let mut conversation = Conversation::from_history(vec![early, late]);
        assert!(conversation.insert(middle));

        let texts: Vec<_> = conversation.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["early", "middle", "late"]);
        assert_eq!(conversation.last().unwrap().text, "late");
    }

    #[test]
    fn test_extend_counts_only_new() {
        let a = msg("a", 0);
        let b = msg("b", 1);
        let mut conversation = Conversation::from_history(vec![a.clone()]);
        assert_eq!(conversation.extend(vec![a, b]), 1);
    }
}
