//! WebSocket admission and the per-connection relay loop.
//!
//! Admission is checked before the upgrade completes. A refused socket is
//! still upgraded, then immediately closed with the policy-violation code,
//! so browsers see a proper close frame instead of a failed handshake.
//!
//! An admitted connection is split in two: a writer task that owns the
//! sink and drains an unbounded channel, and the reader loop below, which
//! decodes frames and hands them to the [`Relay`](crate::relay::Relay).

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use murmur_shared::constants::CLOSE_POLICY_VIOLATION;
use murmur_shared::protocol::{InboundEvent, OutboundEvent};
use murmur_shared::types::UserId;
use murmur_shared::ProtocolError;
use murmur_store::User;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::api::AppState;
use crate::auth::session_token;
use crate::error::{AdmissionDenied, DeliveryError};
use crate::registry::{next_connection_id, Connection, ConnectionId};

/// Close code sent when the server shuts a connection (ban, logout).
const CLOSE_NORMAL: u16 = 1000;

/// Frames queued for one socket before further sends count as failed
/// deliveries.
const OUTBOUND_QUEUE: usize = 256;

// ---------------------------------------------------------------------------
// Connection handle
// ---------------------------------------------------------------------------

/// Registry handle for one WebSocket. Sending queues a text frame for the
/// writer task; closing wakes the reader loop and queues a close frame.
/// A full queue fails the send, so a stalled peer gets unregistered.
pub struct WsConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Message>,
    shutdown: Arc<Notify>,
}

impl WsConnection {
    fn new(tx: mpsc::Sender<Message>, shutdown: Arc<Notify>) -> Self {
        Self {
            id: next_connection_id(),
            tx,
            shutdown,
        }
    }

    fn enqueue(&self, message: Message) -> Result<(), DeliveryError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backlogged,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, event: &OutboundEvent) -> Result<(), DeliveryError> {
        let frame = event.to_frame()?;
        self.enqueue(Message::Text(frame.into()))
    }

    fn close(&self) -> Result<(), DeliveryError> {
        self.shutdown.notify_one();
        self.enqueue(Message::Close(Some(CloseFrame {
            code: CLOSE_NORMAL,
            reason: "".into(),
        })))
    }
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// GET /ws/{user_id}
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let claimed = UserId::new(user_id);
    let token = session_token(&headers);

    match admit(&state, &claimed, token.as_deref()).await {
        Ok(user) => {
            info!(user_id = %user.id, username = %user.username, "websocket admitted");
            let token = token.unwrap_or_default();
            ws.on_upgrade(move |socket| run_connection(socket, state, user.id, token))
        }
        Err(denied) => {
            warn!(user_id = %claimed, reason = %denied, "websocket admission denied");
            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: denied.to_string().into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}

/// Check that `token` is a live session for `claimed` and that the account
/// exists and is not banned.
pub async fn admit(
    state: &AppState,
    claimed: &UserId,
    token: Option<&str>,
) -> Result<User, AdmissionDenied> {
    let token = token.ok_or(AdmissionDenied::MissingToken)?;
    let owner = state
        .sessions
        .user_for(token)
        .await
        .ok_or(AdmissionDenied::UnknownToken)?;
    if owner != *claimed {
        return Err(AdmissionDenied::UserMismatch);
    }

    let lookup = claimed.clone();
    let user = match state.records.call(move |db| db.get_user(lookup.as_str())).await {
        Ok(user) => user.ok_or(AdmissionDenied::UnknownUser)?,
        Err(e) => {
            error!(user_id = %claimed, error = %e, "user lookup failed during admission");
            return Err(AdmissionDenied::UnknownUser);
        }
    };

    if user.is_banned {
        return Err(AdmissionDenied::Banned);
    }
    Ok(user)
}

// ---------------------------------------------------------------------------
// Relay loop
// ---------------------------------------------------------------------------

async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId, token: String) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    let shutdown = Arc::new(Notify::new());

    let conn = Arc::new(WsConnection::new(tx, shutdown.clone()));
    let conn_id = conn.id;

    tokio::spawn(writer_task(sink, rx));

    if attach(&state, &user_id, &token, conn).await {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!(user_id = %user_id, conn_id, "connection closed by server");
                    break;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match InboundEvent::decode(text.as_str()) {
                        Ok(event) => {
                            state.relay.handle(&user_id, event).await;
                        }
                        Err(e) => {
                            debug!(user_id = %user_id, error = %e, "undecodable frame, closing");
                            break;
                        }
                    },
                    Some(Ok(Message::Binary(_))) => {
                        debug!(user_id = %user_id, error = %ProtocolError::Binary, "closing");
                        break;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Ping/pong are answered by the WebSocket layer.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(user_id = %user_id, error = %e, "websocket read failed");
                        break;
                    }
                }
            }
        }
    }

    state.hub().disconnect(&user_id, conn_id).await;
    info!(user_id = %user_id, conn_id, "websocket closed");
}

/// Register an admitted connection, then confirm its session is still
/// live. A ban, delete or logout that ran after admission has already
/// swept the registry, so a connection registering late is closed here.
pub(crate) async fn attach(
    state: &AppState,
    user_id: &UserId,
    token: &str,
    conn: Arc<dyn Connection>,
) -> bool {
    state.hub().connect(user_id, conn.clone()).await;

    if state.sessions.user_for(token).await.as_ref() == Some(user_id) {
        return true;
    }

    warn!(user_id = %user_id, "session revoked during admission, closing");
    let _ = conn.close();
    false
}

/// Forward queued frames to the socket until the channel closes, a write
/// fails, or a close frame has been sent.
async fn writer_task(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Message>) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = sink.close().await;
}
