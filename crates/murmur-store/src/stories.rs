//! Ephemeral stories. Expired rows are purged lazily whenever the live set
//! is read.

use murmur_shared::constants::STORY_TTL_MS;
use murmur_shared::types::UserId;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::Story;

impl Database {
    /// Store a story created at `now_ms`; it expires a day later.
    pub fn insert_story(
        &self,
        user_id: &UserId,
        image: &str,
        caption: &str,
        now_ms: i64,
    ) -> Result<Story> {
        let story = Story {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.clone(),
            image: image.to_string(),
            caption: caption.to_string(),
            created_at: now_ms,
            expires_at: now_ms + STORY_TTL_MS,
        };

        self.conn().execute(
            "INSERT INTO stories (id, user_id, image, caption, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                story.id,
                story.user_id.as_str(),
                story.image,
                story.caption,
                story.created_at,
                story.expires_at,
            ],
        )?;
        Ok(story)
    }

    /// Stories still live at `now_ms`, newest first.
    pub fn live_stories(&self, now_ms: i64) -> Result<Vec<Story>> {
        let purged = self
            .conn()
            .execute("DELETE FROM stories WHERE expires_at <= ?1", params![now_ms])?;
        if purged > 0 {
            tracing::debug!(purged, "purged expired stories");
        }

        let mut stmt = self.conn().prepare(
            "SELECT id, user_id, image, caption, created_at, expires_at
             FROM stories ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Story {
                id: row.get(0)?,
                user_id: UserId::new(row.get::<_, String>(1)?),
                image: row.get(2)?,
                caption: row.get(3)?,
                created_at: row.get(4)?,
                expires_at: row.get(5)?,
            })
        })?;

        let mut stories = Vec::new();
        for row in rows {
            stories.push(row?);
        }
        Ok(stories)
    }

    /// Remove every story posted by `user_id`. Used when an account is deleted.
    pub fn delete_stories_for_user(&self, user_id: &UserId) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM stories WHERE user_id = ?1",
            params![user_id.as_str()],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_stories_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::from("a");

        db.insert_story(&a, "data:image/png;base64,A", "old", 1_000).unwrap();
        db.insert_story(&a, "data:image/png;base64,B", "new", 2_000).unwrap();

        let live = db.live_stories(3_000).unwrap();
        let captions: Vec<_> = live.iter().map(|s| s.caption.as_str()).collect();
        assert_eq!(captions, ["new", "old"]);
    }

    #[test]
    fn test_expired_stories_are_purged() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId::from("a");

        let story = db.insert_story(&a, "data:image/png;base64,A", "", 0).unwrap();
        assert_eq!(story.expires_at, STORY_TTL_MS);

        assert_eq!(db.live_stories(STORY_TTL_MS - 1).unwrap().len(), 1);
        assert!(db.live_stories(STORY_TTL_MS).unwrap().is_empty());
    }

    #[test]
    fn test_delete_stories_for_user() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::from("a"), UserId::from("b"));

        db.insert_story(&a, "data:image/png;base64,A", "", 0).unwrap();
        db.insert_story(&b, "data:image/png;base64,B", "", 0).unwrap();

        assert_eq!(db.delete_stories_for_user(&a).unwrap(), 1);
        let live = db.live_stories(1).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].user_id, b);
    }
}
