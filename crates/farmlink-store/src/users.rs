use chrono::Utc;
use farmlink_shared::{Role, User, UserId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Insert a user or refresh its name, role and email.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, role, email, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                role = excluded.role,
                email = excluded.email",
            params![
                user.id.as_str(),
                user.name,
                user.role.as_str(),
                user.email,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, name, role, email FROM users WHERE id = ?1",
                params![id.as_str()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Every user except `id`, ordered by name.
    pub fn list_users_except(&self, id: &UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, role, email FROM users
             WHERE id != ?1
             ORDER BY name COLLATE NOCASE, id",
        )?;

        let rows = stmt.query_map(params![id.as_str()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(2)?;
    Ok(User {
        id: UserId(row.get(0)?),
        name: row.get(1)?,
        role: Role::parse(&role),
        email: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, name: &str, role: Role) -> User {
        User {
            id: id.into(),
            name: name.into(),
            role,
            email: None,
        }
    }

    #[test]
    fn upsert_then_find() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(&user("u1", "Meena", Role::Farmer)).unwrap();
        db.upsert_user(&user("u1", "Meena K", Role::Admin)).unwrap();

        let found = db.find_user(&"u1".into()).unwrap().unwrap();
        assert_eq!(found.name, "Meena K");
        assert_eq!(found.role, Role::Admin);
        assert!(db.find_user(&"missing".into()).unwrap().is_none());
    }

    #[test]
    fn list_excludes_caller() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(&user("a", "Zubair", Role::Farmer)).unwrap();
        db.upsert_user(&user("b", "anita", Role::Admin)).unwrap();
        db.upsert_user(&user("c", "Bhola", Role::Farmer)).unwrap();

        let names: Vec<String> = db
            .list_users_except(&"a".into())
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, vec!["anita", "Bhola"]);
    }
}
