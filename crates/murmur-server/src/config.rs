//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use murmur_shared::constants::DEFAULT_HTTP_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP and WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./data/murmur.db`
    pub database_path: PathBuf,

    /// bcrypt work factor.
    /// Env: `BCRYPT_COST`
    /// Default: `10`
    pub bcrypt_cost: u32,

    /// Usernames that become admins when they register (case-insensitive).
    /// Env: `ADMIN_USERNAMES` (comma-separated)
    /// Default: none
    pub admin_usernames: Vec<String>,

    /// Pause between delivering `banned` to a user and closing their
    /// connections, so the frame can be flushed.
    /// Env: `BAN_GRACE_MS`
    /// Default: `200`
    pub ban_grace: Duration,

    /// Whether the session cookie carries the `Secure` attribute.
    /// Env: `COOKIE_SECURE` (true/false)
    /// Default: `false`
    pub cookie_secure: bool,

    /// Largest accepted story image, in bytes of its data URI.
    /// Env: `MAX_STORY_BYTES`
    /// Default: `2500000`
    pub max_story_bytes: usize,

    /// Directory of the web client. Unknown non-API paths get its
    /// `index.html`.
    /// Env: `PUBLIC_DIR`
    /// Default: `./public`
    pub public_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./data/murmur.db"),
            bcrypt_cost: 10,
            admin_usernames: Vec::new(),
            ban_grace: Duration::from_millis(200),
            cookie_secure: false,
            max_story_bytes: 2_500_000,
            public_dir: PathBuf::from("./public"),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(val) = var("BCRYPT_COST") {
            match val.parse::<u32>() {
                Ok(cost) if (4..=31).contains(&cost) => config.bcrypt_cost = cost,
                _ => tracing::warn!(value = %val, "Invalid BCRYPT_COST, using default"),
            }
        }

        if let Some(val) = var("ADMIN_USERNAMES") {
            config.admin_usernames = val
                .split(',')
                .map(|name| name.trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect();
        }

        if let Some(val) = var("BAN_GRACE_MS") {
            match val.parse::<u64>() {
                Ok(ms) => config.ban_grace = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %val, "Invalid BAN_GRACE_MS, using default"),
            }
        }

        if let Some(val) = var("COOKIE_SECURE") {
            config.cookie_secure = val == "true" || val == "1";
        }

        if let Some(val) = var("MAX_STORY_BYTES") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_story_bytes = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_STORY_BYTES, using default"),
            }
        }

        if let Some(path) = var("PUBLIC_DIR") {
            config.public_dir = PathBuf::from(path);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn is_admin_username(&self, username: &str) -> bool {
        let username = username.to_lowercase();
        self.admin_usernames.iter().any(|name| *name == username)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.ban_grace, Duration::from_millis(200));
        assert!(!config.cookie_secure);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("ADMIN_USERNAMES", "Root, ops ,,"),
            ("BAN_GRACE_MS", "0"),
            ("COOKIE_SECURE", "true"),
            ("PUBLIC_DIR", "/srv/murmur/web"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.admin_usernames, ["root", "ops"]);
        assert!(config.is_admin_username("ROOT"));
        assert!(!config.is_admin_username("guest"));
        assert_eq!(config.ban_grace, Duration::ZERO);
        assert!(config.cookie_secure);
        assert_eq!(config.public_dir, PathBuf::from("/srv/murmur/web"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = load(&[
            ("HTTP_ADDR", "nowhere"),
            ("BCRYPT_COST", "99"),
            ("MAX_STORY_BYTES", "lots"),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.bcrypt_cost, defaults.bcrypt_cost);
        assert_eq!(config.max_story_bytes, defaults.max_story_bytes);
    }
}
