//! # murmur-server
//!
//! Real-time presence and message relay for murmur direct messages.
//!
//! The crate provides:
//! - **REST API** (axum) for accounts, profiles, chats, stories and
//!   moderation
//! - **WebSocket relay** that persists chat messages and reactions, fans
//!   out typing indicators, and forwards call-signaling frames
//! - **Presence tracking** that announces a user offline exactly once,
//!   when their last connection goes away

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod hub;
pub mod records;
pub mod registry;
pub mod relay;
pub mod sessions;
pub mod signaling;
pub mod ws;

#[cfg(test)]
mod testing;

pub use api::{build_router, serve, AppState};
pub use config::ServerConfig;
pub use error::ServerError;
