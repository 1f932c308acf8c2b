//! End-to-end tests over a real socket: admission, presence, message relay,
//! call signaling and the ban flow.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures::{SinkExt, StreamExt};
use murmur_server::auth::hash_password;
use murmur_server::{build_router, AppState, ServerConfig};
use murmur_shared::types::UserId;
use murmur_store::{Database, NewUser};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    state: AppState,
    addr: SocketAddr,
    _dir: TempDir,
}

/// Start the server on a random port, backed by a database in a temp dir.
async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = Database::open_at(&dir.path().join("murmur.db")).expect("Failed to open DB");

    let config = ServerConfig {
        bcrypt_cost: 4,
        ban_grace: Duration::from_millis(50),
        admin_usernames: vec!["root".to_string()],
        ..ServerConfig::default()
    };
    let state = AppState::new(config, db).await.unwrap();

    let app = build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        state,
        addr,
        _dir: dir,
    }
}

/// Create an account and a session for it. Returns (user id, token).
async fn sign_up(state: &AppState, username: &str) -> (UserId, String) {
    let password_hash = hash_password("pw".into(), 4).await.unwrap();
    let new_user = NewUser {
        username: username.to_string(),
        name: username.to_string(),
        password_hash,
        bio: String::new(),
        avatar_seed: "seed".to_string(),
        is_admin: state.config.is_admin_username(username),
    };
    let user = state
        .records
        .call(move |db| db.create_user(&new_user))
        .await
        .unwrap();
    let token = state.sessions.issue(&user.id).await;
    (user.id, token)
}

async fn open_chat(state: &AppState, a: &UserId, b: &UserId) -> String {
    let (a, b) = (a.clone(), b.clone());
    let (chat, _) = state
        .records
        .call(move |db| db.find_or_create_chat(&a, &b))
        .await
        .unwrap();
    chat.id.as_str().to_string()
}

async fn connect(addr: SocketAddr, user_id: &UserId, token: &str) -> Client {
    let mut request = format!("ws://{addr}/ws/{}", user_id.as_str())
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Cookie",
        HeaderValue::from_str(&format!("session_token={token}")).unwrap(),
    );
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("WebSocket handshake failed");
    ws
}

/// Next text frame as JSON. Panics after two seconds of silence.
async fn next_json(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read failed");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Assert nothing arrives for a short while.
async fn expect_silence(ws: &mut Client) {
    if let Ok(Some(Ok(Message::Text(text)))) =
        tokio::time::timeout(Duration::from_millis(200), ws.next()).await
    {
        panic!("unexpected frame: {text}");
    }
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn test_presence_on_connect() {
    let server = start_server().await;
    let (alice, alice_token) = sign_up(&server.state, "alice").await;
    let (bob, bob_token) = sign_up(&server.state, "bob").await;

    let mut a = connect(server.addr, &alice, &alice_token).await;
    assert_eq!(
        next_json(&mut a).await,
        json!({ "type": "presence_snapshot", "onlineUserIds": [alice.as_str()] })
    );
    assert_eq!(
        next_json(&mut a).await,
        json!({ "type": "user_status", "userId": alice.as_str(), "status": "online" })
    );

    let mut b = connect(server.addr, &bob, &bob_token).await;
    let snapshot = next_json(&mut b).await;
    assert_eq!(snapshot["type"], "presence_snapshot");
    assert_eq!(snapshot["onlineUserIds"].as_array().unwrap().len(), 2);

    assert_eq!(
        next_json(&mut a).await,
        json!({ "type": "user_status", "userId": bob.as_str(), "status": "online" })
    );

    b.close(None).await.unwrap();
    assert_eq!(
        next_json(&mut a).await,
        json!({ "type": "user_status", "userId": bob.as_str(), "status": "offline" })
    );
}

#[tokio::test]
async fn test_second_connection_keeps_user_online() {
    let server = start_server().await;
    let (alice, alice_token) = sign_up(&server.state, "alice").await;
    let (bob, bob_token) = sign_up(&server.state, "bob").await;

    let mut a = connect(server.addr, &alice, &alice_token).await;
    next_json(&mut a).await;
    next_json(&mut a).await;

    let mut b1 = connect(server.addr, &bob, &bob_token).await;
    let mut b2 = connect(server.addr, &bob, &bob_token).await;
    assert_eq!(next_json(&mut a).await["status"], "online");
    assert_eq!(next_json(&mut a).await["status"], "online");

    b1.close(None).await.unwrap();
    expect_silence(&mut a).await;

    b2.close(None).await.unwrap();
    assert_eq!(
        next_json(&mut a).await,
        json!({ "type": "user_status", "userId": bob.as_str(), "status": "offline" })
    );
}

#[tokio::test]
async fn test_admission_denied_closes_with_policy_code() {
    let server = start_server().await;
    let (alice, alice_token) = sign_up(&server.state, "alice").await;
    let (bob, _) = sign_up(&server.state, "bob").await;

    // Alice's token presented for Bob's id.
    let mut ws = connect(server.addr, &bob, &alice_token).await;
    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Close(Some(close)) => assert_eq!(u16::from(close.code), 1008),
        other => panic!("expected close frame, got {other:?}"),
    }

    assert!(!server.state.hub().is_online(&bob).await);
    assert!(!server.state.hub().is_online(&alice).await);
}

#[tokio::test]
async fn test_message_and_signal_relay() {
    let server = start_server().await;
    let (alice, alice_token) = sign_up(&server.state, "alice").await;
    let (bob, bob_token) = sign_up(&server.state, "bob").await;
    let chat_id = open_chat(&server.state, &alice, &bob).await;

    let mut a = connect(server.addr, &alice, &alice_token).await;
    next_json(&mut a).await;
    next_json(&mut a).await;
    let mut b = connect(server.addr, &bob, &bob_token).await;
    next_json(&mut b).await;
    next_json(&mut b).await;
    next_json(&mut a).await;

    send_json(&mut a, json!({ "type": "send_message", "chatId": chat_id, "text": "hi" })).await;

    let to_bob = next_json(&mut b).await;
    let to_alice = next_json(&mut a).await;
    assert_eq!(to_bob, to_alice);
    assert_eq!(to_bob["type"], "new_message");
    assert_eq!(to_bob["message"]["text"], "hi");
    assert_eq!(to_bob["message"]["fromId"], alice.as_str());

    let stored = server
        .state
        .records
        .call({
            let chat_id = chat_id.clone();
            move |db| db.messages_for_chat(&chat_id.as_str().into())
        })
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);

    send_json(
        &mut a,
        json!({ "type": "webrtc_offer", "chatId": chat_id, "sdp": "v=0" }),
    )
    .await;
    assert_eq!(
        next_json(&mut b).await,
        json!({ "type": "webrtc_offer", "chatId": chat_id, "sdp": "v=0", "fromId": alice.as_str() })
    );

    b.close(None).await.unwrap();
    assert_eq!(next_json(&mut a).await["status"], "offline");

    send_json(&mut a, json!({ "type": "call_invite", "chatId": chat_id })).await;
    assert_eq!(
        next_json(&mut a).await,
        json!({ "type": "call_unavailable", "chatId": chat_id, "reason": "offline" })
    );
}

#[tokio::test]
async fn test_ban_announces_offline_once() {
    let server = start_server().await;
    let (alice, alice_token) = sign_up(&server.state, "alice").await;
    let (bob, bob_token) = sign_up(&server.state, "bob").await;
    let (_, root_token) = sign_up(&server.state, "root").await;

    let mut b = connect(server.addr, &bob, &bob_token).await;
    next_json(&mut b).await;
    next_json(&mut b).await;

    let mut a1 = connect(server.addr, &alice, &alice_token).await;
    let mut a2 = connect(server.addr, &alice, &alice_token).await;
    assert_eq!(next_json(&mut b).await["status"], "online");
    assert_eq!(next_json(&mut b).await["status"], "online");

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/admin/users/{}/toggle_ban", alice.as_str()))
        .header(header::COOKIE, format!("session_token={root_token}"))
        .body(Body::empty())
        .unwrap();
    let response = build_router(server.state.clone())
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for ws in [&mut a1, &mut a2] {
        loop {
            let event = next_json(ws).await;
            if event["type"] == "banned" {
                break;
            }
        }
    }

    assert_eq!(
        next_json(&mut b).await,
        json!({ "type": "user_status", "userId": alice.as_str(), "status": "offline" })
    );
    expect_silence(&mut b).await;

    assert!(!server.state.hub().is_online(&alice).await);
    assert!(server.state.sessions.user_for(&alice_token).await.is_none());
}
