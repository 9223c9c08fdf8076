use chrono::{DateTime, SecondsFormat, Utc};
use farmlink_shared::{Message, MessageId, UserId};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::NewMessage;

impl Database {
    pub fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.0.to_string(),
                message.sender_id.as_str(),
                message.receiver_id.as_str(),
                message.text,
                encode_timestamp(&message.created_at),
            ],
        )?;

        Ok(Message {
            id: message.id,
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            text: message.text.clone(),
            created_at: message.created_at,
        })
    }

    /// All messages exchanged between `a` and `b`, oldest first. Messages with
    /// equal timestamps keep their insertion order.
    pub fn messages_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, text, created_at
             FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, seq ASC",
        )?;

        let rows = stmt.query_map(params![a.as_str(), b.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

/// Fixed-width UTC encoding so that text ordering equals time ordering.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let ts_str: String = row.get(4)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: MessageId(id),
        sender_id: UserId(row.get(1)?),
        receiver_id: UserId(row.get(2)?),
        text: row.get(3)?,
        created_at,
    })
}
