use std::collections::HashMap;

use murmur_shared::types::{ChatId, MessageId, Reactions, UserId};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Toggle `user_id`'s `reaction` on a message. Returns `true` if the
    /// reaction is now present, `false` if it was removed.
    pub fn toggle_reaction(
        &self,
        chat_id: &ChatId,
        message_id: MessageId,
        reaction: &str,
        user_id: &UserId,
    ) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;

        let removed = tx.execute(
            "DELETE FROM reactions
             WHERE chat_id = ?1 AND message_id = ?2 AND reaction = ?3 AND user_id = ?4",
            params![chat_id.as_str(), message_id.0, reaction, user_id.as_str()],
        )?;

        if removed == 0 {
            tx.execute(
                "INSERT INTO reactions (chat_id, message_id, reaction, user_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![chat_id.as_str(), message_id.0, reaction, user_id.as_str()],
            )?;
        }

        tx.commit()?;
        Ok(removed == 0)
    }

    /// Reaction map of one message. Reactors are listed in the order they
    /// reacted; reactions with no reactors left do not appear.
    pub fn reactions_for_message(
        &self,
        chat_id: &ChatId,
        message_id: MessageId,
    ) -> Result<Reactions> {
        let mut stmt = self.conn().prepare(
            "SELECT reaction, user_id FROM reactions
             WHERE chat_id = ?1 AND message_id = ?2 ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![chat_id.as_str(), message_id.0], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut reactions = Reactions::new();
        for row in rows {
            let (reaction, user_id) = row?;
            reactions
                .entry(reaction)
                .or_default()
                .push(UserId::new(user_id));
        }
        Ok(reactions)
    }

    /// Reaction maps of every message in a chat, in one query. Messages
    /// without reactions are absent.
    pub fn reactions_for_chat(&self, chat_id: &ChatId) -> Result<HashMap<MessageId, Reactions>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, reaction, user_id FROM reactions
             WHERE chat_id = ?1 ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![chat_id.as_str()], |row| {
            Ok((
                MessageId(row.get(0)?),
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut map: HashMap<MessageId, Reactions> = HashMap::new();
        for row in rows {
            let (message_id, reaction, user_id) = row?;
            map.entry(message_id)
                .or_default()
                .entry(reaction)
                .or_default()
                .push(UserId::new(user_id));
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use murmur_shared::types::Message;

    use super::*;

    fn setup() -> (Database, ChatId) {
        let db = Database::open_in_memory().unwrap();
        let (chat, _) = db
            .find_or_create_chat(&UserId::from("a"), &UserId::from("b"))
            .unwrap();
        db.insert_message(
            &chat.id,
            &Message {
                id: MessageId(1),
                from_id: UserId::from("a"),
                text: "hi".to_string(),
                time: "09:30".to_string(),
                kind: None,
                duration: None,
                peaks: None,
                reply_to: None,
                reactions: Default::default(),
            },
        )
        .unwrap();
        (db, chat.id)
    }

    #[test]
    fn test_toggle_twice_restores_state() {
        let (db, chat_id) = setup();
        let a = UserId::from("a");

        assert!(db.toggle_reaction(&chat_id, MessageId(1), "heart", &a).unwrap());
        let map = db.reactions_for_message(&chat_id, MessageId(1)).unwrap();
        assert_eq!(map["heart"], vec![a.clone()]);

        assert!(!db.toggle_reaction(&chat_id, MessageId(1), "heart", &a).unwrap());
        assert!(db.reactions_for_message(&chat_id, MessageId(1)).unwrap().is_empty());
    }

    #[test]
    fn test_reactors_keep_arrival_order() {
        let (db, chat_id) = setup();
        let (a, b) = (UserId::from("a"), UserId::from("b"));

        db.toggle_reaction(&chat_id, MessageId(1), "fire", &b).unwrap();
        db.toggle_reaction(&chat_id, MessageId(1), "fire", &a).unwrap();
        db.toggle_reaction(&chat_id, MessageId(1), "heart", &a).unwrap();

        let map = db.reactions_for_message(&chat_id, MessageId(1)).unwrap();
        assert_eq!(map["fire"], vec![b, a.clone()]);
        assert_eq!(map["heart"], vec![a]);

        let by_message = db.reactions_for_chat(&chat_id).unwrap();
        assert_eq!(by_message[&MessageId(1)], map);
    }

    #[test]
    fn test_reaction_on_missing_message_fails() {
        let (db, chat_id) = setup();
        let result = db.toggle_reaction(&chat_id, MessageId(99), "heart", &UserId::from("a"));
        assert!(result.is_err());
    }
}
