use thiserror::Error;

/// A frame that cannot be decoded into an event envelope at all.
///
/// This is distinct from a malformed event (missing or mistyped fields),
/// which decodes fine and is dropped by the relay.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Binary frames are not supported")]
    Binary,
}
