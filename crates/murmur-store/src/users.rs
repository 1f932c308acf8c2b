//! CRUD operations for [`User`] records.

use murmur_shared::types::UserId;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{NewUser, ProfileUpdate, User};

const USER_COLUMNS: &str =
    "id, username, name, bio, avatar_seed, theme, dark_mode, joined_at, is_admin, is_banned";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new account. Fails with [`StoreError::UsernameTaken`] when
    /// the username exists in any letter case.
    pub fn create_user(&self, new_user: &NewUser) -> Result<User> {
        if self.username_in_use(&new_user.username, None)? {
            return Err(StoreError::UsernameTaken(new_user.username.clone()));
        }

        let user = User {
            id: UserId::new(Uuid::new_v4().to_string()),
            username: new_user.username.clone(),
            name: new_user.name.clone(),
            bio: new_user.bio.clone(),
            avatar_seed: new_user.avatar_seed.clone(),
            theme: "default".to_string(),
            dark_mode: false,
            joined_at: chrono::Local::now().format("%d/%m/%Y").to_string(),
            is_admin: new_user.is_admin,
            is_banned: false,
        };

        self.conn().execute(
            "INSERT INTO users (id, username, name, password_hash, bio, avatar_seed, theme,
                                dark_mode, joined_at, is_admin, is_banned)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                user.id.as_str(),
                user.username,
                user.name,
                new_user.password_hash,
                user.bio,
                user.avatar_seed,
                user.theme,
                user.dark_mode,
                user.joined_at,
                user.is_admin,
                user.is_banned,
            ],
        )?;

        Ok(user)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Look up an account and its password hash by case-insensitive username.
    pub fn get_credentials(&self, username: &str) -> Result<Option<(User, String)>> {
        let found = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS}, password_hash FROM users
                     WHERE username = ?1 COLLATE NOCASE"
                ),
                params![username],
                |row| Ok((row_to_user(row)?, row.get::<_, String>(10)?)),
            )
            .optional()?;
        Ok(found)
    }

    pub fn password_hash(&self, id: &str) -> Result<Option<String>> {
        let hash = self
            .conn()
            .query_row(
                "SELECT password_hash FROM users WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// All accounts, oldest first.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY rowid ASC"))?;

        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    fn username_in_use(&self, username: &str, except: Option<&str>) -> Result<bool> {
        let owner: Option<String> = self
            .conn()
            .query_row(
                "SELECT id FROM users WHERE username = ?1 COLLATE NOCASE",
                params![username],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match (owner, except) {
            (Some(owner), Some(except)) => owner != except,
            (Some(_), None) => true,
            (None, _) => false,
        })
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Flip the ban flag. Returns the new value, or `None` for an unknown id.
    pub fn toggle_banned(&self, id: &str) -> Result<Option<bool>> {
        let affected = self.conn().execute(
            "UPDATE users SET is_banned = NOT is_banned WHERE id = ?1",
            params![id],
        )?;
        if affected == 0 {
            return Ok(None);
        }

        let banned = self.conn().query_row(
            "SELECT is_banned FROM users WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(Some(banned))
    }

    pub fn set_password_hash(&self, id: &str, hash: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![hash, id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn update_profile(&self, id: &str, profile: &ProfileUpdate) -> Result<User> {
        if self.username_in_use(&profile.username, Some(id))? {
            return Err(StoreError::UsernameTaken(profile.username.clone()));
        }

        let affected = self.conn().execute(
            "UPDATE users
             SET username = ?1, name = ?2, bio = ?3, avatar_seed = ?4, theme = ?5, dark_mode = ?6
             WHERE id = ?7",
            params![
                profile.username,
                profile.name,
                profile.bio,
                profile.avatar_seed,
                profile.theme,
                profile.dark_mode,
                id,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        self.get_user(id)?.ok_or(StoreError::NotFound)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete an account. Returns `true` if a row was deleted.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` selected with `USER_COLUMNS` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId::new(row.get::<_, String>(0)?),
        username: row.get(1)?,
        name: row.get(2)?,
        bio: row.get(3)?,
        avatar_seed: row.get(4)?,
        theme: row.get(5)?,
        dark_mode: row.get(6)?,
        joined_at: row.get(7)?,
        is_admin: row.get(8)?,
        is_banned: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            name: username.to_uppercase(),
            password_hash: "hash".to_string(),
            bio: String::new(),
            avatar_seed: "seed".to_string(),
            is_admin: false,
        }
    }

    #[test]
    fn test_create_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user(&new_user("alice")).unwrap();

        assert_eq!(db.get_user(alice.id.as_str()).unwrap(), Some(alice.clone()));
        assert!(db.get_user("missing").unwrap().is_none());

        let (found, hash) = db.get_credentials("ALICE").unwrap().unwrap();
        assert_eq!(found.id, alice.id);
        assert_eq!(hash, "hash");
    }

    #[test]
    fn test_username_is_case_insensitive_unique() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&new_user("alice")).unwrap();

        let err = db.create_user(&new_user("Alice")).unwrap_err();
        assert!(matches!(err, StoreError::UsernameTaken(_)));
    }

    #[test]
    fn test_toggle_ban() {
        let db = Database::open_in_memory().unwrap();
        let bob = db.create_user(&new_user("bob")).unwrap();

        assert_eq!(db.toggle_banned(bob.id.as_str()).unwrap(), Some(true));
        assert!(db.get_user(bob.id.as_str()).unwrap().unwrap().is_banned);
        assert_eq!(db.toggle_banned(bob.id.as_str()).unwrap(), Some(false));
        assert_eq!(db.toggle_banned("missing").unwrap(), None);
    }

    #[test]
    fn test_profile_update_keeps_own_username() {
        let db = Database::open_in_memory().unwrap();
        let carol = db.create_user(&new_user("carol")).unwrap();
        db.create_user(&new_user("dave")).unwrap();

        let mut profile = ProfileUpdate {
            username: "Carol".to_string(),
            name: "Carol C".to_string(),
            bio: "hi".to_string(),
            avatar_seed: "s".to_string(),
            theme: "dark".to_string(),
            dark_mode: true,
        };
        let updated = db.update_profile(carol.id.as_str(), &profile).unwrap();
        assert_eq!(updated.username, "Carol");
        assert!(updated.dark_mode);

        profile.username = "DAVE".to_string();
        assert!(matches!(
            db.update_profile(carol.id.as_str(), &profile),
            Err(StoreError::UsernameTaken(_))
        ));
    }

    #[test]
    fn test_delete_user() {
        let db = Database::open_in_memory().unwrap();
        let erin = db.create_user(&new_user("erin")).unwrap();

        assert!(db.delete_user(erin.id.as_str()).unwrap());
        assert!(!db.delete_user(erin.id.as_str()).unwrap());
        assert!(db.list_users().unwrap().is_empty());
    }
}
