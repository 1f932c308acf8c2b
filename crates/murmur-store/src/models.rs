//! Record structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! layer. Password hashes never leave the store through these types.

use murmur_shared::types::{ChatId, Message, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account, without its credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Display name.
    pub name: String,
    pub bio: String,
    pub avatar_seed: String,
    pub theme: String,
    pub dark_mode: bool,
    /// `dd/mm/yyyy`, display only.
    pub joined_at: String,
    pub is_admin: bool,
    pub is_banned: bool,
}

/// Input for [`Database::create_user`](crate::Database::create_user).
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub password_hash: String,
    pub bio: String,
    pub avatar_seed: String,
    pub is_admin: bool,
}

/// Editable profile fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub username: String,
    pub name: String,
    pub bio: String,
    pub avatar_seed: String,
    pub theme: String,
    pub dark_mode: bool,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A two-party conversation. The message log lives in its own table.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub participants: [UserId; 2],
}

impl Chat {
    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.contains(user_id)
    }

    /// The participant that is not `user_id`.
    pub fn other_participant(&self, user_id: &UserId) -> Option<&UserId> {
        self.participants.iter().find(|p| *p != user_id)
    }
}

/// A chat together with its most recent message, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPreview {
    pub chat: Chat,
    pub last_message: Option<Message>,
}

// ---------------------------------------------------------------------------
// Story
// ---------------------------------------------------------------------------

/// An ephemeral image post.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub user_id: UserId,
    pub image: String,
    pub caption: String,
    /// Unix millis.
    pub created_at: i64,
    /// Unix millis.
    pub expires_at: i64,
}
