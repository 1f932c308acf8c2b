//! # murmur-store
//!
//! Durable record store for murmur, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for users, chats,
//! messages, reactions and stories. Callers that live on an async runtime
//! are expected to drive it from a blocking task.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reactions;
pub mod stories;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
