/// Application name
pub const APP_NAME: &str = "murmur";

/// Cookie that carries the session token
pub const SESSION_COOKIE: &str = "session_token";

/// WebSocket close code sent when admission is refused (policy violation)
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Reaction used when a react event names none
pub const DEFAULT_REACTION: &str = "heart";

/// Upper bound for a single waveform peak
pub const MAX_PEAK_VALUE: i64 = 1000;

/// Maximum number of waveform peaks kept on an audio message
pub const MAX_PEAKS: usize = 128;

/// Reason reported in `call_unavailable` when the callee has no connection
pub const UNAVAILABLE_OFFLINE: &str = "offline";

/// Story lifetime in milliseconds (24h)
pub const STORY_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Maximum story caption length in characters
pub const MAX_CAPTION_CHARS: usize = 300;

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
