use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque user identifier issued by the auth provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account role. `Admin` is the privileged support role; farmers are the
/// standard role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    #[serde(other)]
    Farmer,
}

impl Role {
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Farmer => "farmer",
        }
    }

    /// Parse a stored role string. Anything that is not `admin` is a farmer.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Farmer
        }
    }
}

/// A user directory entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The authenticated principal of a session, as vouched for by the auth
/// provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: UserId,
    pub role: Role,
    pub name: String,
}

impl From<User> for Identity {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            role: u.role,
            name: u.name,
        }
    }
}

/// A persisted direct message. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether this message belongs to the conversation between `a` and `b`,
    /// in either direction.
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.sender_id == a && &self.receiver_id == b)
            || (&self.sender_id == b && &self.receiver_id == a)
    }
}

/// Directory listing returned to a client: everyone except the caller,
/// grouped by role.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    pub admins: Vec<User>,
    pub users: Vec<User>,
}

impl DirectoryListing {
    pub fn from_users(users: impl IntoIterator<Item = User>) -> Self {
        let (admins, users) = users.into_iter().partition(|u| u.role.is_privileged());
        Self { admins, users }
    }

    pub fn into_users(self) -> Vec<User> {
        let mut all = self.admins;
        all.extend(self.users);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_role_reads_as_farmer() {
        let role: Role = serde_json::from_str("\"veterinarian\"").unwrap();
        assert_eq!(role, Role::Farmer);
        assert_eq!(Role::parse("ADMIN"), Role::Admin);
        assert_eq!(Role::parse("user"), Role::Farmer);
    }

    #[test]
    fn test_message_is_between_either_direction() {
        let a = UserId::from("a");
        let b = UserId::from("b");
        let msg = Message {
            id: MessageId::new(),
            sender_id: b.clone(),
            receiver_id: a.clone(),
            text: "hi".into(),
            created_at: Utc::now(),
        };
        assert!(msg.is_between(&a, &b));
        assert!(msg.is_between(&b, &a));
        assert!(!msg.is_between(&a, &UserId::from("c")));
    }

    #[test]
    fn test_directory_listing_groups_by_role() {
        let listing = DirectoryListing::from_users(vec![
            User {
                id: "1".into(),
                name: "Asha".into(),
                role: Role::Admin,
                email: None,
            },
            User {
                id: "2".into(),
                name: "Ravi".into(),
                role: Role::Farmer,
                email: None,
            },
        ]);
        assert_eq!(listing.admins.len(), 1);
        assert_eq!(listing.users.len(), 1);
        assert_eq!(listing.into_users().len(), 2);
    }
}
