//! Credentials, session tokens and the request extractors built on them.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use murmur_shared::constants::SESSION_COOKIE;
use murmur_store::User;

use crate::api::AppState;
use crate::error::ServerError;

// ---------------------------------------------------------------------------
// Tokens and cookies
// ---------------------------------------------------------------------------

/// Session token from the `session_token` cookie, or failing that from an
/// `Authorization: Bearer` header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    })
}

pub fn session_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn expired_session_cookie(secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

pub async fn hash_password(password: String, cost: u32) -> Result<String, ServerError> {
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
    Ok(hash)
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, ServerError> {
    let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
    Ok(valid)
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// The account behind the request's session token. Rejects missing or
/// revoked sessions with 401 and banned accounts with 403.
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(ServerError::Unauthorized)?;
        let user_id = state
            .sessions
            .user_for(&token)
            .await
            .ok_or(ServerError::Unauthorized)?;

        let user = state
            .records
            .call(move |db| db.get_user(user_id.as_str()))
            .await?
            .ok_or(ServerError::Unauthorized)?;

        if user.is_banned {
            return Err(ServerError::Forbidden("Account suspended".into()));
        }

        Ok(Self { user, token })
    }
}

/// A [`CurrentUser`] that is also an admin.
pub struct AdminUser(pub User);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser { user, .. } = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(ServerError::Forbidden("Admins only".into()));
        }
        Ok(Self(user))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; session_token=abc-123; other=1"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_cookie_wins_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(session_token(&headers).as_deref(), Some("from-header"));

        headers.insert(COOKIE, HeaderValue::from_static("session_token=from-cookie"));
        assert_eq!(session_token(&headers).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_missing_or_empty_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        headers.insert(COOKIE, HeaderValue::from_static("session_token="));
        assert_eq!(session_token(&headers), None);
    }

    #[test]
    fn test_cookie_attributes() {
        assert_eq!(
            session_cookie("t", false),
            "session_token=t; Path=/; HttpOnly; SameSite=Lax"
        );
        assert!(session_cookie("t", true).ends_with("; Secure"));
        assert!(expired_session_cookie(false).contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_password_round_trip() {
        let hash = hash_password("hunter2".into(), 4).await.unwrap();
        assert!(verify_password("hunter2".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("hunter3".into(), hash).await.unwrap());
    }
}
