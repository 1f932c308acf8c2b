//! CRUD operations for [`Chat`] records.

use chrono::Utc;
use murmur_shared::types::{ChatId, UserId};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::{Chat, ChatPreview};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Return the chat between `a` and `b`, creating it on first contact.
    /// The flag reports whether a new chat was created.
    pub fn find_or_create_chat(&self, a: &UserId, b: &UserId) -> Result<(Chat, bool)> {
        let existing = self
            .conn()
            .query_row(
                "SELECT id, participant_a, participant_b FROM chats
                 WHERE (participant_a = ?1 AND participant_b = ?2)
                    OR (participant_a = ?2 AND participant_b = ?1)
                 LIMIT 1",
                params![a.as_str(), b.as_str()],
                row_to_chat,
            )
            .optional()?;

        if let Some(chat) = existing {
            return Ok((chat, false));
        }

        let chat = Chat {
            id: ChatId::new(Uuid::new_v4().to_string()),
            participants: [a.clone(), b.clone()],
        };

        self.conn().execute(
            "INSERT INTO chats (id, participant_a, participant_b, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                chat.id.as_str(),
                a.as_str(),
                b.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        tracing::debug!(chat_id = %chat.id, "created chat");
        Ok((chat, true))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_chat(&self, id: &str) -> Result<Option<Chat>> {
        let chat = self
            .conn()
            .query_row(
                "SELECT id, participant_a, participant_b FROM chats WHERE id = ?1",
                params![id],
                row_to_chat,
            )
            .optional()?;
        Ok(chat)
    }

    /// Every chat `user_id` takes part in, with its latest message.
    pub fn chats_for_user(&self, user_id: &UserId) -> Result<Vec<ChatPreview>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, participant_a, participant_b FROM chats
             WHERE participant_a = ?1 OR participant_b = ?1
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![user_id.as_str()], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }

        chats
            .into_iter()
            .map(|chat| {
                let last_message = self.last_message(&chat.id)?;
                Ok(ChatPreview { chat, last_message })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a chat and its whole message log. Returns the removed chat so
    /// the caller can notify its former participants.
    pub fn delete_chat(&self, id: &str) -> Result<Option<Chat>> {
        let Some(chat) = self.get_chat(id)? else {
            return Ok(None);
        };

        self.conn()
            .execute("DELETE FROM chats WHERE id = ?1", params![id])?;
        Ok(Some(chat))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: ChatId::new(row.get::<_, String>(0)?),
        participants: [
            UserId::new(row.get::<_, String>(1)?),
            UserId::new(row.get::<_, String>(2)?),
        ],
    })
}
