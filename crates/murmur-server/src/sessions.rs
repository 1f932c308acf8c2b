//! In-memory session directory.
//!
//! Maps opaque session tokens to user ids. Tokens live for the lifetime of
//! the process; a restart logs everyone out.

use std::collections::HashMap;
use std::sync::Arc;

use murmur_shared::types::UserId;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Token -> user id. A user may hold several tokens (one per device).
#[derive(Clone, Default)]
pub struct SessionDirectory {
    sessions: Arc<RwLock<HashMap<String, UserId>>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for `user_id`.
    pub async fn issue(&self, user_id: &UserId) -> String {
        let token = Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .insert(token.clone(), user_id.clone());

        debug!(user_id = %user_id, "issued session");
        token
    }

    pub async fn user_for(&self, token: &str) -> Option<UserId> {
        self.sessions.read().await.get(token).cloned()
    }

    /// Revoke a single token. Returns the user it belonged to.
    pub async fn revoke(&self, token: &str) -> Option<UserId> {
        self.sessions.write().await.remove(token)
    }

    /// Revoke every token held by `user_id`. Returns how many were removed.
    pub async fn revoke_all_for(&self, user_id: &UserId) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, owner| owner != user_id);
        let removed = before - sessions.len();

        debug!(user_id = %user_id, removed, "revoked sessions");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_and_lookup() {
        let sessions = SessionDirectory::new();
        let alice = UserId::from("alice");

        let token = sessions.issue(&alice).await;
        assert_eq!(sessions.user_for(&token).await, Some(alice.clone()));
        assert_eq!(sessions.user_for("bogus").await, None);

        assert_eq!(sessions.revoke(&token).await, Some(alice));
        assert_eq!(sessions.user_for(&token).await, None);
    }

    #[tokio::test]
    async fn test_revoke_all_keeps_other_users() {
        let sessions = SessionDirectory::new();
        let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));

        let phone = sessions.issue(&alice).await;
        let laptop = sessions.issue(&alice).await;
        let other = sessions.issue(&bob).await;
        assert_ne!(phone, laptop);

        assert_eq!(sessions.revoke_all_for(&alice).await, 2);
        assert_eq!(sessions.user_for(&phone).await, None);
        assert_eq!(sessions.user_for(&laptop).await, None);
        assert_eq!(sessions.user_for(&other).await, Some(bob));
    }
}
