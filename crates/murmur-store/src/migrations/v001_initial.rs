//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `users`, `chats`, `messages`, `reactions`
//! and `stories`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    username      TEXT NOT NULL,
    name          TEXT NOT NULL,
    password_hash TEXT NOT NULL,              -- bcrypt
    bio           TEXT NOT NULL DEFAULT '',
    avatar_seed   TEXT NOT NULL DEFAULT '',
    theme         TEXT NOT NULL DEFAULT 'default',
    dark_mode     INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    joined_at     TEXT NOT NULL,              -- dd/mm/yyyy, display only
    is_admin      INTEGER NOT NULL DEFAULT 0,
    is_banned     INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username
    ON users(username COLLATE NOCASE);

-- ----------------------------------------------------------------
-- Chats (always exactly two participants)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    participant_a TEXT NOT NULL,
    participant_b TEXT NOT NULL,
    created_at    TEXT NOT NULL               -- RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_chats_a ON chats(participant_a);
CREATE INDEX IF NOT EXISTS idx_chats_b ON chats(participant_b);

-- ----------------------------------------------------------------
-- Messages (append-only, ordered by id)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    chat_id  TEXT NOT NULL,
    id       INTEGER NOT NULL,                -- millisecond clock id
    from_id  TEXT NOT NULL,
    text     TEXT NOT NULL,
    time     TEXT NOT NULL,                   -- HH:MM, display only
    kind     TEXT,                            -- audio | image | NULL
    duration INTEGER,
    peaks    TEXT,                            -- JSON array
    reply_to TEXT,                            -- JSON snapshot

    PRIMARY KEY (chat_id, id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Reactions (presence of a row is the toggle state)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id    TEXT NOT NULL,
    message_id INTEGER NOT NULL,
    reaction   TEXT NOT NULL,
    user_id    TEXT NOT NULL,

    FOREIGN KEY (chat_id, message_id) REFERENCES messages(chat_id, id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_reactions_unique
    ON reactions(chat_id, message_id, reaction, user_id);

-- ----------------------------------------------------------------
-- Stories (expire after 24h)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS stories (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    user_id    TEXT NOT NULL,
    image      TEXT NOT NULL,                 -- data:image URI
    caption    TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,              -- unix millis
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stories_expires ON stories(expires_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
