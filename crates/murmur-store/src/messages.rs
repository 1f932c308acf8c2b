use murmur_shared::types::{ChatId, Message, MessageId, MessageKind, ReplySnapshot, UserId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

const MESSAGE_COLUMNS: &str = "id, from_id, text, time, kind, duration, peaks, reply_to";

impl Database {
    /// Append a message to a chat's log. Reactions on the message are not
    /// written here; a fresh message has none.
    pub fn insert_message(&self, chat_id: &ChatId, message: &Message) -> Result<()> {
        let peaks = message.peaks.as_ref().map(serde_json::to_string).transpose()?;
        let reply_to = message
            .reply_to
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn().execute(
            "INSERT INTO messages (chat_id, id, from_id, text, time, kind, duration, peaks, reply_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                chat_id.as_str(),
                message.id.0,
                message.from_id.as_str(),
                message.text,
                message.time,
                message.kind.map(|k| k.as_str()),
                message.duration,
                peaks,
                reply_to,
            ],
        )?;
        Ok(())
    }

    /// Find a message in a chat by the string form of its id. Ids that are
    /// not integers never match.
    pub fn find_message(&self, chat_id: &ChatId, key: &str) -> Result<Option<Message>> {
        let Ok(id) = key.trim().parse::<i64>() else {
            return Ok(None);
        };

        let message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 AND id = ?2"),
                params![chat_id.as_str(), id],
                row_to_message,
            )
            .optional()?;

        match message {
            Some(mut message) => {
                message.reactions = self.reactions_for_message(chat_id, message.id)?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// The full log of a chat in chronological order, reactions attached.
    pub fn messages_for_chat(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY id ASC"
        ))?;

        let rows = stmt.query_map(params![chat_id.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        let mut reactions = self.reactions_for_chat(chat_id)?;
        for message in &mut messages {
            if let Some(r) = reactions.remove(&message.id) {
                message.reactions = r;
            }
        }
        Ok(messages)
    }

    pub fn last_message(&self, chat_id: &ChatId) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1
                     ORDER BY id DESC LIMIT 1"
                ),
                params![chat_id.as_str()],
                row_to_message,
            )
            .optional()?;

        match message {
            Some(mut message) => {
                message.reactions = self.reactions_for_message(chat_id, message.id)?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Highest message id ever stored, used to seed the id clock.
    pub fn max_message_id(&self) -> Result<Option<MessageId>> {
        let max: Option<i64> =
            self.conn()
                .query_row("SELECT MAX(id) FROM messages", [], |row| row.get(0))?;
        Ok(max.map(MessageId))
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind: Option<String> = row.get(4)?;
    let peaks_json: Option<String> = row.get(6)?;
    let reply_json: Option<String> = row.get(7)?;

    let peaks = peaks_json
        .map(|s| serde_json::from_str::<Vec<u16>>(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let reply_to = reply_json
        .map(|s| serde_json::from_str::<ReplySnapshot>(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: MessageId(row.get(0)?),
        from_id: UserId::new(row.get::<_, String>(1)?),
        text: row.get(2)?,
        time: row.get(3)?,
        kind: kind.as_deref().and_then(MessageKind::parse),
        duration: row.get(5)?,
        peaks,
        reply_to,
        reactions: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: i64, from: &str, text: &str) -> Message {
        Message {
            id: MessageId(id),
            from_id: UserId::from(from),
            text: text.to_string(),
            time: "12:00".to_string(),
            kind: None,
            duration: None,
            peaks: None,
            reply_to: None,
            reactions: Default::default(),
        }
    }

    #[test]
    fn test_append_and_read_in_order() {
        let db = Database::open_in_memory().unwrap();
        let (chat, _) = db
            .find_or_create_chat(&UserId::from("a"), &UserId::from("b"))
            .unwrap();

        db.insert_message(&chat.id, &message(2, "b", "second")).unwrap();
        db.insert_message(&chat.id, &message(1, "a", "first")).unwrap();

        let log = db.messages_for_chat(&chat.id).unwrap();
        let texts: Vec<_> = log.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["first", "second"]);
        assert_eq!(db.last_message(&chat.id).unwrap().unwrap().id, MessageId(2));
        assert_eq!(db.max_message_id().unwrap(), Some(MessageId(2)));
    }

    #[test]
    fn test_audio_and_reply_columns_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let (chat, _) = db
            .find_or_create_chat(&UserId::from("a"), &UserId::from("b"))
            .unwrap();

        let original = message(1, "a", "hello");
        db.insert_message(&chat.id, &original).unwrap();

        let mut voice = message(2, "b", "data:audio/webm;base64,AAAA");
        voice.kind = Some(MessageKind::Audio);
        voice.duration = Some(3);
        voice.peaks = Some(vec![0, 500, 1000]);
        voice.reply_to = Some(original.snapshot());
        db.insert_message(&chat.id, &voice).unwrap();

        let stored = db.find_message(&chat.id, "2").unwrap().unwrap();
        assert_eq!(stored, voice);
    }

    #[test]
    fn test_find_message_scoped_to_chat() {
        let db = Database::open_in_memory().unwrap();
        let (c1, _) = db
            .find_or_create_chat(&UserId::from("a"), &UserId::from("b"))
            .unwrap();
        let (c2, _) = db
            .find_or_create_chat(&UserId::from("a"), &UserId::from("c"))
            .unwrap();

        db.insert_message(&c1.id, &message(7, "a", "x")).unwrap();

        assert!(db.find_message(&c1.id, "7").unwrap().is_some());
        assert!(db.find_message(&c2.id, "7").unwrap().is_none());
        assert!(db.find_message(&c1.id, "seven").unwrap().is_none());
    }

    #[test]
    fn test_messages_removed_with_chat() {
        let db = Database::open_in_memory().unwrap();
        let (chat, _) = db
            .find_or_create_chat(&UserId::from("a"), &UserId::from("b"))
            .unwrap();
        db.insert_message(&chat.id, &message(1, "a", "x")).unwrap();

        db.delete_chat(chat.id.as_str()).unwrap();
        assert!(db.messages_for_chat(&chat.id).unwrap().is_empty());
        assert_eq!(db.max_message_id().unwrap(), None);
    }
}
