use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{header, Method},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use murmur_shared::constants::MAX_CAPTION_CHARS;
use murmur_shared::protocol::ServerEvent;
use murmur_shared::types::{ChatId, Message, UserId};
use murmur_store::{Database, NewUser, ProfileUpdate, User};
use serde::{Deserialize, Serialize};
use tower::{ServiceBuilder, ServiceExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::auth::{
    expired_session_cookie, hash_password, session_cookie, session_token, verify_password,
    AdminUser, CurrentUser,
};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::Hub;
use crate::records::Records;
use crate::relay::Relay;
use crate::sessions::SessionDirectory;
use crate::ws::ws_upgrade;

const DEFAULT_BIO: &str = "Hey there! I'm using murmur.";

/// Headroom on top of the story cap for the rest of the JSON body.
const BODY_OVERHEAD: usize = 64 * 1024;

/// Unmatched paths under these prefixes get a JSON 404 instead of the web
/// client.
const API_PREFIXES: [&str; 3] = ["/api", "/auth", "/ws"];

type WebClient = ServeDir<ServeFile>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub records: Records,
    pub sessions: SessionDirectory,
    pub relay: Relay,
}

impl AppState {
    pub async fn new(config: ServerConfig, db: Database) -> Result<Self, ServerError> {
        let records = Records::new(db);
        let relay = Relay::new(Hub::default(), records.clone()).await?;
        Ok(Self {
            config: Arc::new(config),
            records,
            sessions: SessionDirectory::new(),
            relay,
        })
    }

    pub fn hub(&self) -> &Hub {
        self.relay.hub()
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let body_limit = state.config.max_story_bytes + BODY_OVERHEAD;
    let public_dir = &state.config.public_dir;
    let web_client =
        ServeDir::new(public_dir).fallback(ServeFile::new(public_dir.join("index.html")));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws/{user_id}", get(ws_upgrade))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/change-password", post(change_password))
        .route("/api/me", get(me))
        .route("/api/me/profile", post(update_profile))
        .route("/api/users", get(list_users))
        .route("/api/users/{id}", get(get_user))
        .route("/api/chats", get(list_chats).post(create_chat))
        .route("/api/chats/{id}/messages", get(chat_messages))
        .route("/api/stories", get(list_stories).post(create_story))
        .route("/api/admin/all_users", get(admin_all_users))
        .route("/api/admin/users/{id}/toggle_ban", post(admin_toggle_ban))
        .route("/api/admin/users/{id}", delete(admin_delete_user))
        .route("/api/admin/chats/{id}", delete(admin_delete_chat))
        .fallback(move |req: Request| serve_web_client(web_client.clone(), req))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    name: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct SessionResponse {
    message: &'static str,
    user: User,
    token: String,
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

#[derive(Deserialize)]
struct CreateChatRequest {
    target_user_id: UserId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatCreated {
    id: ChatId,
    messages: Vec<Message>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatSummary {
    id: ChatId,
    other_user: OtherUser,
    last_message: Option<Message>,
    unread: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtherUser {
    id: UserId,
    name: String,
    avatar_seed: String,
    status: &'static str,
    is_online: bool,
}

#[derive(Deserialize)]
struct CreateStoryRequest {
    image: String,
    #[serde(default)]
    caption: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoryView {
    id: String,
    image: String,
    caption: String,
    created_at: i64,
    expires_at: i64,
    user: StoryAuthor,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoryAuthor {
    id: UserId,
    username: String,
    name: String,
    avatar_seed: String,
    is_admin: bool,
}

fn message(text: &'static str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": text }))
}

fn required(field: &str, value: &str) -> Result<(), ServerError> {
    if value.trim().is_empty() {
        return Err(ServerError::BadRequest(format!("{field} is required")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Web client
// ---------------------------------------------------------------------------

fn is_api_path(path: &str) -> bool {
    API_PREFIXES.iter().any(|prefix| {
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

/// Static files from the public directory, with `index.html` for any other
/// path so client-side routes load.
async fn serve_web_client(web_client: WebClient, req: Request) -> Response {
    if is_api_path(req.uri().path()) {
        return ServerError::NotFound("Not found".into()).into_response();
    }
    match web_client.oneshot(req).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ServerError> {
    required("username", &req.username)?;
    required("name", &req.name)?;
    required("password", &req.password)?;

    let password_hash = hash_password(req.password, state.config.bcrypt_cost).await?;
    let new_user = NewUser {
        is_admin: state.config.is_admin_username(req.username.trim()),
        username: req.username.trim().to_string(),
        name: req.name.trim().to_string(),
        password_hash,
        bio: DEFAULT_BIO.to_string(),
        avatar_seed: Uuid::new_v4().simple().to_string()[..8].to_string(),
    };

    let user = state.records.call(move |db| db.create_user(&new_user)).await?;
    let token = state.sessions.issue(&user.id).await;

    info!(user_id = %user.id, username = %user.username, admin = user.is_admin, "registered");

    let cookie = session_cookie(&token, state.config.cookie_secure);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(SessionResponse {
            message: "Registered",
            user,
            token,
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let username = req.username.trim().to_string();
    let (user, hash) = state
        .records
        .call(move |db| db.get_credentials(&username))
        .await?
        .ok_or(ServerError::Unauthorized)?;

    if !verify_password(req.password, hash).await? {
        return Err(ServerError::Unauthorized);
    }
    if user.is_banned {
        return Err(ServerError::Forbidden("Account suspended".into()));
    }

    let token = state.sessions.issue(&user.id).await;
    info!(user_id = %user.id, "logged in");

    let cookie = session_cookie(&token, state.config.cookie_secure);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(SessionResponse {
            message: "OK",
            user,
            token,
        }),
    ))
}

/// Revoke the presented token and close the user's live connections.
/// Succeeds even without a valid session.
async fn logout(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> impl IntoResponse {
    if let Some(token) = session_token(&headers) {
        if let Some(user_id) = state.sessions.revoke(&token).await {
            let closed = state.hub().force_offline(&user_id).await;
            info!(user_id = %user_id, closed, "logged out");
        }
    }

    (
        [(header::SET_COOKIE, expired_session_cookie(state.config.cookie_secure))],
        message("OK"),
    )
}

async fn change_password(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    required("new_password", &req.new_password)?;

    let user_id = current.user.id.clone();
    let hash = state
        .records
        .call(move |db| db.password_hash(user_id.as_str()))
        .await?
        .ok_or_else(|| ServerError::NotFound("User not found".into()))?;

    if !verify_password(req.current_password, hash).await? {
        return Err(ServerError::BadRequest("Current password is incorrect".into()));
    }

    let new_hash = hash_password(req.new_password, state.config.bcrypt_cost).await?;
    let user_id = current.user.id.clone();
    state
        .records
        .call(move |db| db.set_password_hash(user_id.as_str(), &new_hash))
        .await?;

    Ok(message("Password updated"))
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

async fn me(current: CurrentUser) -> Json<User> {
    Json(current.user)
}

async fn update_profile(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(profile): Json<ProfileUpdate>,
) -> Result<Json<User>, ServerError> {
    required("username", &profile.username)?;
    required("name", &profile.name)?;

    let user_id = current.user.id;
    let user = state
        .records
        .call(move |db| db.update_profile(user_id.as_str(), &profile))
        .await?;
    Ok(Json(user))
}

/// Everyone except the caller and banned accounts.
async fn list_users(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<User>>, ServerError> {
    let users = state.records.call(|db| db.list_users()).await?;
    Ok(Json(
        users
            .into_iter()
            .filter(|u| u.id != current.user.id && !u.is_banned)
            .collect(),
    ))
}

async fn get_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<User>, ServerError> {
    let user = state
        .records
        .call(move |db| db.get_user(&id))
        .await?
        .filter(|u| !u.is_banned || current.user.is_admin)
        .ok_or_else(|| ServerError::NotFound("User not found".into()))?;
    Ok(Json(user))
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

async fn list_chats(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<ChatSummary>>, ServerError> {
    let user_id = current.user.id.clone();
    let previews = state
        .records
        .call(move |db| {
            let mut out = Vec::new();
            for preview in db.chats_for_user(&user_id)? {
                let Some(other_id) = preview.chat.other_participant(&user_id) else {
                    continue;
                };
                if let Some(other) = db.get_user(other_id.as_str())? {
                    out.push((preview, other));
                }
            }
            Ok(out)
        })
        .await?;

    let mut summaries = Vec::with_capacity(previews.len());
    for (preview, other) in previews {
        let is_online = state.hub().is_online(&other.id).await;
        let status = if other.is_banned {
            "Suspended"
        } else if is_online {
            "Online"
        } else {
            "Offline"
        };

        summaries.push(ChatSummary {
            id: preview.chat.id,
            other_user: OtherUser {
                id: other.id,
                name: other.name,
                avatar_seed: other.avatar_seed,
                status,
                is_online,
            },
            last_message: preview.last_message,
            unread: 0,
        });
    }
    Ok(Json(summaries))
}

async fn create_chat(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<CreateChatRequest>,
) -> Result<Json<ChatCreated>, ServerError> {
    if req.target_user_id == current.user.id {
        return Err(ServerError::BadRequest("Cannot start a chat with yourself".into()));
    }

    let is_admin = current.user.is_admin;
    let caller = current.user.id;
    let target = req.target_user_id;
    let created = state
        .records
        .call(move |db| {
            let available = db
                .get_user(target.as_str())?
                .is_some_and(|u| !u.is_banned || is_admin);
            if !available {
                return Ok(None);
            }
            let (chat, _) = db.find_or_create_chat(&caller, &target)?;
            let messages = db.messages_for_chat(&chat.id)?;
            Ok(Some(ChatCreated {
                id: chat.id,
                messages,
            }))
        })
        .await?
        .ok_or_else(|| ServerError::NotFound("User not available".into()))?;

    Ok(Json(created))
}

async fn chat_messages(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let user_id = current.user.id;
    let messages = state
        .records
        .call(move |db| match db.get_chat(&id)? {
            Some(chat) if chat.has_participant(&user_id) => {
                db.messages_for_chat(&chat.id).map(Some)
            }
            _ => Ok(None),
        })
        .await?
        .ok_or_else(|| ServerError::NotFound("Chat not found".into()))?;
    Ok(Json(messages))
}

// ---------------------------------------------------------------------------
// Stories
// ---------------------------------------------------------------------------

async fn list_stories(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<StoryView>>, ServerError> {
    let now = chrono::Utc::now().timestamp_millis();
    let (stories, users) = state
        .records
        .call(move |db| Ok((db.live_stories(now)?, db.list_users()?)))
        .await?;

    let views = stories
        .into_iter()
        .filter_map(|story| {
            let author = users.iter().find(|u| u.id == story.user_id)?;
            if author.is_banned && !current.user.is_admin {
                return None;
            }
            Some(StoryView {
                id: story.id,
                image: story.image,
                caption: story.caption,
                created_at: story.created_at,
                expires_at: story.expires_at,
                user: StoryAuthor {
                    id: author.id.clone(),
                    username: author.username.clone(),
                    name: author.name.clone(),
                    avatar_seed: author.avatar_seed.clone(),
                    is_admin: author.is_admin,
                },
            })
        })
        .collect();
    Ok(Json(views))
}

async fn create_story(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<CreateStoryRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let image = req.image.trim().to_string();
    if !image.starts_with("data:image") {
        return Err(ServerError::BadRequest("Invalid image".into()));
    }
    let max = state.config.max_story_bytes;
    if image.len() > max {
        return Err(ServerError::TooLarge {
            size: image.len(),
            max,
        });
    }

    let caption: String = req
        .caption
        .unwrap_or_default()
        .trim()
        .chars()
        .take(MAX_CAPTION_CHARS)
        .collect();

    let now = chrono::Utc::now().timestamp_millis();
    let user_id = current.user.id;
    let story = state
        .records
        .call(move |db| db.insert_story(&user_id, &image, &caption, now))
        .await?;

    info!(story_id = %story.id, user_id = %story.user_id, "story posted");
    state.hub().broadcast(ServerEvent::StoriesUpdated).await;

    Ok(Json(serde_json::json!({ "message": "OK", "storyId": story.id })))
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

async fn admin_all_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<User>>, ServerError> {
    Ok(Json(state.records.call(|db| db.list_users()).await?))
}

/// Flip a user's ban. Banning tells the user, waits for the frame to
/// flush, revokes every session, and closes their connections.
async fn admin_toggle_ban(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if id == admin.id.as_str() {
        return Err(ServerError::BadRequest("Cannot ban yourself".into()));
    }

    let target = id.clone();
    let banned = state
        .records
        .call(move |db| db.toggle_banned(&target))
        .await?
        .ok_or_else(|| ServerError::NotFound("User not found".into()))?;

    let user_id = UserId::new(id);
    if banned {
        state.hub().send_to_user(&user_id, ServerEvent::Banned).await;
        tokio::time::sleep(state.config.ban_grace).await;

        let revoked = state.sessions.revoke_all_for(&user_id).await;
        let closed = state.hub().force_offline(&user_id).await;
        info!(user_id = %user_id, admin = %admin.id, revoked, closed, "user banned");
    } else {
        info!(user_id = %user_id, admin = %admin.id, "user unbanned");
    }

    Ok(Json(serde_json::json!({ "status": banned })))
}

async fn admin_delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if id == admin.id.as_str() {
        return Err(ServerError::BadRequest("Cannot delete your own account".into()));
    }

    let user_id = UserId::new(id);
    let target = user_id.clone();
    let deleted = state
        .records
        .call(move |db| {
            let deleted = db.delete_user(target.as_str())?;
            if deleted {
                db.delete_stories_for_user(&target)?;
            }
            Ok(deleted)
        })
        .await?;
    if !deleted {
        return Err(ServerError::NotFound("User not found".into()));
    }

    let revoked = state.sessions.revoke_all_for(&user_id).await;
    let closed = state.hub().force_offline(&user_id).await;
    info!(user_id = %user_id, admin = %admin.id, revoked, closed, "user deleted");

    Ok(message("User deleted"))
}

async fn admin_delete_chat(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let chat_id = ChatId::new(id);
    let _guard = state.relay.chat_locks().lock(&chat_id).await;

    let target = chat_id.clone();
    let chat = state
        .records
        .call(move |db| db.delete_chat(target.as_str()))
        .await?
        .ok_or_else(|| ServerError::NotFound("Chat not found".into()))?;

    info!(chat_id = %chat.id, admin = %admin.id, "chat deleted");
    state
        .relay
        .deliver_to_chat(&chat, ServerEvent::ChatDeleted { chat_id: chat.id.clone() })
        .await;

    Ok(Json(serde_json::json!({ "message": "Chat deleted", "chatId": chat_id })))
}
