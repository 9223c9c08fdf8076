//! Role-filtered, searchable view of the directory for the conversation list.

use std::collections::HashSet;

use farmlink_shared::{Identity, Message, User, UserId};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub user: User,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

/// The conversation currently open, used for the `last_message` summary.
pub struct ActiveConversation<'a> {
    pub counterpart: &'a UserId,
    pub last: Option<&'a Message>,
}

/// Standard users only see privileged users; privileged users see everyone
/// else. Online entries come first, then by name.
pub fn project(
    viewer: &Identity,
    directory: &[User],
    online: &HashSet<UserId>,
    query: &str,
    active: Option<ActiveConversation<'_>>,
) -> Vec<ConversationEntry> {
    let needle = query.trim().to_lowercase();

    let mut entries: Vec<ConversationEntry> = directory
        .iter()
        .filter(|u| u.id != viewer.id)
        .filter(|u| viewer.role.is_privileged() || u.role.is_privileged())
        .filter(|u| needle.is_empty() || u.name.to_lowercase().contains(&needle))
        .map(|u| {
            let last_message = active
                .as_ref()
                .filter(|a| a.counterpart == &u.id)
                .and_then(|a| a.last)
                .map(|m| m.text.clone());
            ConversationEntry {
                user: u.clone(),
                online: online.contains(&u.id),
                last_message,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.online
            .cmp(&a.online)
            .then_with(|| a.user.name.to_lowercase().cmp(&b.user.name.to_lowercase()))
    });
    entries
}
