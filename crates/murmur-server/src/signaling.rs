//! Call-signaling relay.
//!
//! The server keeps no call state. Each signaling frame is forwarded to the
//! other participant of the chat with the sender's id attached. How a kind
//! is forwarded is decided by [`FORWARDING`].

use murmur_shared::constants::UNAVAILABLE_OFFLINE;
use murmur_shared::protocol::{OutboundEvent, ServerEvent, SignalFrame, SignalKind};
use murmur_shared::types::UserId;
use tracing::debug;

use crate::error::ServerError;
use crate::relay::{DropReason, Handled, Relay};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardPolicy {
    /// Forward unconditionally. An offline peer simply receives nothing.
    Verbatim,
    /// Forward only if the peer is online; otherwise tell the sender the
    /// peer is unavailable.
    RequireOnline,
}

pub const FORWARDING: [(SignalKind, ForwardPolicy); 9] = [
    (SignalKind::CallInvite, ForwardPolicy::RequireOnline),
    (SignalKind::CallAccept, ForwardPolicy::Verbatim),
    (SignalKind::CallDecline, ForwardPolicy::Verbatim),
    (SignalKind::CallBusy, ForwardPolicy::Verbatim),
    (SignalKind::CallHangup, ForwardPolicy::Verbatim),
    (SignalKind::WebrtcOffer, ForwardPolicy::Verbatim),
    (SignalKind::WebrtcAnswer, ForwardPolicy::Verbatim),
    (SignalKind::WebrtcIce, ForwardPolicy::Verbatim),
    (SignalKind::CallMuteState, ForwardPolicy::Verbatim),
];

pub fn policy_for(kind: SignalKind) -> ForwardPolicy {
    FORWARDING
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, policy)| *policy)
        .unwrap_or(ForwardPolicy::Verbatim)
}

impl Relay {
    pub(crate) async fn relay_signal(
        &self,
        sender: &UserId,
        frame: SignalFrame,
    ) -> Result<Handled, ServerError> {
        let Some(chat_id) = frame.chat_id.clone() else {
            return Ok(Handled::Dropped(DropReason::MissingFields));
        };

        let target = chat_id.clone();
        let Some(chat) = self.records.call(move |db| db.get_chat(target.as_str())).await? else {
            return Ok(Handled::Dropped(DropReason::UnknownChat));
        };
        if !chat.has_participant(sender) {
            return Ok(Handled::Dropped(DropReason::NotParticipant));
        }
        let Some(peer) = chat.other_participant(sender) else {
            return Ok(Handled::Dropped(DropReason::NotParticipant));
        };

        if policy_for(frame.kind) == ForwardPolicy::RequireOnline && !self.hub.is_online(peer).await {
            debug!(
                chat_id = %chat_id,
                kind = frame.kind.as_str(),
                "peer offline, call unavailable"
            );
            let event = ServerEvent::CallUnavailable {
                chat_id,
                reason: UNAVAILABLE_OFFLINE.to_string(),
            };
            self.hub.send_to_user(sender, event).await;
            return Ok(Handled::Unavailable);
        }

        debug!(chat_id = %chat_id, kind = frame.kind.as_str(), "relaying signal");
        self.hub
            .send_to_user(peer, OutboundEvent::Relayed(frame.forwarded_from(sender)))
            .await;
        Ok(Handled::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::relay::tests::{fixture, send};

    #[test]
    fn test_table_covers_every_kind() {
        for kind in SignalKind::ALL {
            assert_eq!(FORWARDING.iter().filter(|(k, _)| *k == kind).count(), 1);
        }
        assert_eq!(policy_for(SignalKind::CallInvite), ForwardPolicy::RequireOnline);
        assert_eq!(policy_for(SignalKind::WebrtcIce), ForwardPolicy::Verbatim);
    }

    #[tokio::test]
    async fn test_every_kind_forwarded_with_sender() {
        let f = fixture().await;

        for kind in SignalKind::ALL {
            f.b.clear();
            let frame = json!({ "type": kind.as_str(), "chatId": f.chat.id, "blob": { "n": 1 } });

            assert_eq!(send(&f.relay, &f.alice, frame).await, Handled::Delivered);
            assert_eq!(
                f.b.frames(),
                vec![json!({
                    "type": kind.as_str(),
                    "chatId": f.chat.id,
                    "blob": { "n": 1 },
                    "fromId": "alice",
                })]
            );
        }
        assert!(f.a.events().is_empty());
    }

    #[tokio::test]
    async fn test_invite_to_offline_peer_is_unavailable() {
        let f = fixture().await;
        f.relay.hub.force_offline(&f.bob).await;
        f.a.clear();

        let invite = json!({ "type": "call_invite", "chatId": f.chat.id, "video": true });
        assert_eq!(send(&f.relay, &f.alice, invite).await, Handled::Unavailable);

        assert_eq!(
            f.a.frames(),
            vec![json!({ "type": "call_unavailable", "chatId": f.chat.id, "reason": "offline" })]
        );
        assert!(f.b.events().is_empty());
    }

    #[tokio::test]
    async fn test_non_invite_to_offline_peer_is_silent() {
        let f = fixture().await;
        f.relay.hub.force_offline(&f.bob).await;
        f.a.clear();

        let hangup = json!({ "type": "call_hangup", "chatId": f.chat.id });
        assert_eq!(send(&f.relay, &f.alice, hangup).await, Handled::Delivered);
        assert!(f.a.events().is_empty());
    }

    #[tokio::test]
    async fn test_outsiders_cannot_signal() {
        let f = fixture().await;
        let carol = UserId::from("carol");

        let invite = json!({ "type": "call_invite", "chatId": f.chat.id });
        assert_eq!(
            send(&f.relay, &carol, invite).await,
            Handled::Dropped(DropReason::NotParticipant)
        );

        let missing = json!({ "type": "webrtc_ice" });
        assert_eq!(
            send(&f.relay, &f.alice, missing).await,
            Handled::Dropped(DropReason::MissingFields)
        );
        assert!(f.a.events().is_empty());
        assert!(f.b.events().is_empty());
    }
}
