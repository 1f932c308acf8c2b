//! Per-event relay logic for chat traffic.
//!
//! [`Relay::handle`] takes one decoded inbound event from a connection and
//! either updates the record store and fans the result out to the chat's
//! participants, forwards a call-signaling frame, or drops the event.
//! Dropped events are never reported back to the sender.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use murmur_shared::protocol::{InboundEvent, ReactMessage, SendMessage, ServerEvent, TypingUpdate};
use murmur_shared::types::{ChatId, Message, MessageKind, UserId};
use murmur_store::Chat;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error};

use crate::clock::{display_time, MessageClock};
use crate::error::ServerError;
use crate::hub::Hub;
use crate::records::Records;

/// Why an inbound event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingFields,
    Malformed,
    UnknownType,
    UnknownChat,
    NotParticipant,
    UnknownMessage,
    StoreFailure,
}

/// What the relay did with an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Delivered,
    /// `call_invite` to an offline callee; only the caller was told.
    Unavailable,
    Dropped(DropReason),
}

// ---------------------------------------------------------------------------
// Per-chat serialisation
// ---------------------------------------------------------------------------

/// One async mutex per chat id, held around read-append and reaction
/// toggles so concurrent writers to a chat apply in order. An entry lives
/// only while some task holds or waits for it.
#[derive(Clone, Default)]
pub struct ChatLocks {
    locks: Arc<StdMutex<HashMap<ChatId, Arc<Mutex<()>>>>>,
}

/// Held lock on one chat. Dropping it releases the lock and removes the
/// map entry once nobody else is holding or waiting.
pub struct ChatGuard {
    chat_id: ChatId,
    locks: ChatLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ChatLocks {
    pub async fn lock(&self, chat_id: &ChatId) -> ChatGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(chat_id.clone()).or_default().clone()
        };
        ChatGuard {
            chat_id: chat_id.clone(),
            locks: self.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of chats with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ChatGuard {
    fn drop(&mut self) {
        self.guard.take();

        // Clones are only taken under the map lock, so a count of one here
        // means no holder and no waiter.
        let mut locks = self.locks.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.chat_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.chat_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Relay {
    pub(crate) hub: Hub,
    pub(crate) records: Records,
    chat_locks: ChatLocks,
    clock: Arc<MessageClock>,
}

impl Relay {
    /// Build a relay whose message ids continue after the highest id in the
    /// store.
    pub async fn new(hub: Hub, records: Records) -> Result<Self, ServerError> {
        let seed = records.call(|db| db.max_message_id()).await?;
        Ok(Self {
            hub,
            records,
            chat_locks: ChatLocks::default(),
            clock: Arc::new(MessageClock::starting_after(seed)),
        })
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn chat_locks(&self) -> &ChatLocks {
        &self.chat_locks
    }

    pub async fn handle(&self, sender: &UserId, event: InboundEvent) -> Handled {
        let result = match event {
            InboundEvent::SendMessage(msg) => self.send_message(sender, msg).await,
            InboundEvent::React(react) => self.react(sender, react).await,
            InboundEvent::Typing(update) => self.typing(sender, update).await,
            InboundEvent::Signal(frame) => self.relay_signal(sender, frame).await,
            InboundEvent::Malformed { kind, reason } => {
                debug!(user_id = %sender, kind = %kind, reason = %reason, "malformed event");
                Ok(Handled::Dropped(DropReason::Malformed))
            }
            InboundEvent::Unknown(kind) => {
                debug!(user_id = %sender, kind = ?kind, "unknown event type");
                Ok(Handled::Dropped(DropReason::UnknownType))
            }
        };

        match result {
            Ok(Handled::Dropped(reason)) => {
                debug!(user_id = %sender, ?reason, "event dropped");
                Handled::Dropped(reason)
            }
            Ok(handled) => handled,
            Err(e) => {
                error!(user_id = %sender, error = %e, "relay store failure, event dropped");
                Handled::Dropped(DropReason::StoreFailure)
            }
        }
    }

    /// Deliver an event to both participants of a chat.
    pub async fn deliver_to_chat(&self, chat: &Chat, event: ServerEvent) {
        for participant in &chat.participants {
            self.hub.send_to_user(participant, event.clone()).await;
        }
    }

    // ------------------------------------------------------------------
    // send_message
    // ------------------------------------------------------------------

    async fn send_message(&self, sender: &UserId, msg: SendMessage) -> Result<Handled, ServerError> {
        let Some((chat_id, text)) = msg.target() else {
            return Ok(Handled::Dropped(DropReason::MissingFields));
        };
        let chat_id = chat_id.clone();

        let _guard = self.chat_locks.lock(&chat_id).await;

        // Ids are issued under the chat lock so id order matches delivery order.
        let kind = msg.resolved_kind();
        let audio = kind == Some(MessageKind::Audio);
        let mut message = Message {
            id: self.clock.next_id(),
            from_id: sender.clone(),
            text: text.to_string(),
            time: display_time(),
            kind,
            duration: msg.audio_duration().filter(|_| audio),
            peaks: msg.clean_peaks().filter(|_| audio),
            reply_to: None,
            reactions: Default::default(),
        };
        let reply_target = msg.reply_target();

        let sender_id = sender.clone();
        let target = chat_id.clone();
        let appended = self
            .records
            .call(move |db| {
                let Some(chat) = db.get_chat(target.as_str())? else {
                    return Ok(Err(DropReason::UnknownChat));
                };
                if !chat.has_participant(&sender_id) {
                    return Ok(Err(DropReason::NotParticipant));
                }

                if let Some(key) = reply_target {
                    message.reply_to = db.find_message(&target, &key)?.map(|m| m.snapshot());
                }
                db.insert_message(&target, &message)?;
                Ok(Ok((chat, message)))
            })
            .await?;

        let (chat, message) = match appended {
            Ok(appended) => appended,
            Err(reason) => return Ok(Handled::Dropped(reason)),
        };

        debug!(chat_id = %chat_id, message_id = %message.id, "message appended");
        self.deliver_to_chat(&chat, ServerEvent::NewMessage { chat_id, message })
            .await;
        Ok(Handled::Delivered)
    }

    // ------------------------------------------------------------------
    // react
    // ------------------------------------------------------------------

    async fn react(&self, sender: &UserId, react: ReactMessage) -> Result<Handled, ServerError> {
        let Some((chat_id, key)) = react.target() else {
            return Ok(Handled::Dropped(DropReason::MissingFields));
        };
        let chat_id = chat_id.clone();
        let reaction = react.reaction_name();

        let _guard = self.chat_locks.lock(&chat_id).await;

        let sender_id = sender.clone();
        let target = chat_id.clone();
        let name = reaction.clone();
        let toggled = self
            .records
            .call(move |db| {
                let Some(chat) = db.get_chat(target.as_str())? else {
                    return Ok(Err(DropReason::UnknownChat));
                };
                if !chat.has_participant(&sender_id) {
                    return Ok(Err(DropReason::NotParticipant));
                }
                let Some(message) = db.find_message(&target, &key)? else {
                    return Ok(Err(DropReason::UnknownMessage));
                };

                let active = db.toggle_reaction(&target, message.id, &name, &sender_id)?;
                let reactions = db.reactions_for_message(&target, message.id)?;
                Ok(Ok((chat, message.id, active, reactions)))
            })
            .await?;

        let (chat, message_id, active, reactions) = match toggled {
            Ok(toggled) => toggled,
            Err(reason) => return Ok(Handled::Dropped(reason)),
        };

        let event = ServerEvent::MessageReaction {
            chat_id,
            message_id,
            reaction,
            user_id: sender.clone(),
            active,
            reactions,
        };
        self.deliver_to_chat(&chat, event).await;
        Ok(Handled::Delivered)
    }

    // ------------------------------------------------------------------
    // typing
    // ------------------------------------------------------------------

    /// Typing indicators are not persisted and go to everyone in the chat
    /// but the sender. Participation of the sender is not checked.
    async fn typing(&self, sender: &UserId, update: TypingUpdate) -> Result<Handled, ServerError> {
        let Some(chat_id) = update.chat_id else {
            return Ok(Handled::Dropped(DropReason::MissingFields));
        };

        let target = chat_id.clone();
        let Some(chat) = self.records.call(move |db| db.get_chat(target.as_str())).await? else {
            return Ok(Handled::Dropped(DropReason::UnknownChat));
        };

        let event = ServerEvent::TypingStatus {
            chat_id,
            from_id: sender.clone(),
            is_typing: update.is_typing,
        };
        for participant in chat.participants.iter().filter(|p| *p != sender) {
            self.hub.send_to_user(participant, event.clone()).await;
        }
        Ok(Handled::Delivered)
    }
}
