//! # murmur-shared
//!
//! Types shared by the store and the server: identifiers, the message model
//! and the JSON envelopes exchanged with clients over the live connection.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
