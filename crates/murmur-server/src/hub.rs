//! Delivery and presence on top of the [`ConnectionRegistry`].
//!
//! Every delivery returns one [`ConnectionOutcome`] per connection it
//! tried. Failed connections are unregistered afterwards; when that removes
//! a user's last connection an offline status is broadcast. Those follow-up
//! broadcasts go through a work queue, so a cascade of dead peers is handled
//! iteratively.

use std::collections::VecDeque;
use std::sync::Arc;

use murmur_shared::protocol::{OutboundEvent, ServerEvent};
use murmur_shared::types::{PresenceStatus, UserId};
use tracing::{debug, info};

use crate::error::DeliveryError;
use crate::registry::{Connection, ConnectionId, ConnectionRegistry, Removal};

/// What happened when an event was handed to one connection.
pub struct ConnectionOutcome {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub result: Result<(), DeliveryError>,
}

impl ConnectionOutcome {
    pub fn delivered(&self) -> bool {
        self.result.is_ok()
    }
}

enum Audience {
    User(UserId),
    Everyone,
}

#[derive(Clone, Default)]
pub struct Hub {
    registry: ConnectionRegistry,
}

impl Hub {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.registry.is_online(user_id).await
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    /// Send to every connection of one user.
    pub async fn send_to_user(
        &self,
        user_id: &UserId,
        event: impl Into<OutboundEvent>,
    ) -> Vec<ConnectionOutcome> {
        self.dispatch(Audience::User(user_id.clone()), event.into())
            .await
    }

    /// Send to every user online right now.
    pub async fn broadcast(&self, event: impl Into<OutboundEvent>) -> Vec<ConnectionOutcome> {
        self.dispatch(Audience::Everyone, event.into()).await
    }

    /// Send the current online set to a freshly registered connection.
    pub async fn send_presence_snapshot(&self, user_id: &UserId, conn: &Arc<dyn Connection>) {
        let online_user_ids = self.registry.online_user_ids().await;
        let event = OutboundEvent::from(ServerEvent::PresenceSnapshot { online_user_ids });

        let outcome = ConnectionOutcome {
            user_id: user_id.clone(),
            connection_id: conn.id(),
            result: conn.send(&event),
        };
        self.settle(vec![outcome]).await;
    }

    async fn dispatch(&self, audience: Audience, event: OutboundEvent) -> Vec<ConnectionOutcome> {
        let targets = self.targets(&audience).await;
        let outcomes = deliver(&targets, &event);
        self.settle_outcomes(&outcomes).await;
        outcomes
    }

    async fn targets(&self, audience: &Audience) -> Vec<(UserId, Arc<dyn Connection>)> {
        match audience {
            Audience::User(user_id) => self
                .registry
                .connections_of(user_id)
                .await
                .into_iter()
                .map(|conn| (user_id.clone(), conn))
                .collect(),
            Audience::Everyone => self.registry.all_connections().await,
        }
    }

    async fn settle(&self, outcomes: Vec<ConnectionOutcome>) {
        self.settle_outcomes(&outcomes).await;
    }

    /// Unregister failed connections and announce users that went offline
    /// because of it, including any further failures those announcements
    /// run into.
    async fn settle_outcomes(&self, outcomes: &[ConnectionOutcome]) {
        let mut offline: VecDeque<UserId> = VecDeque::new();
        self.drop_failed(outcomes, &mut offline).await;

        while let Some(user_id) = offline.pop_front() {
            info!(user_id = %user_id, "user offline after delivery failure");
            let event = OutboundEvent::status(user_id, PresenceStatus::Offline);
            let targets = self.targets(&Audience::Everyone).await;
            let outcomes = deliver(&targets, &event);
            self.drop_failed(&outcomes, &mut offline).await;
        }
    }

    async fn drop_failed(&self, outcomes: &[ConnectionOutcome], offline: &mut VecDeque<UserId>) {
        for outcome in outcomes {
            let Err(e) = &outcome.result else {
                continue;
            };

            debug!(
                user_id = %outcome.user_id,
                conn_id = outcome.connection_id,
                error = %e,
                "delivery failed, dropping connection"
            );

            let removal = self
                .registry
                .unregister(&outcome.user_id, outcome.connection_id)
                .await;
            if removal == Removal::WentOffline {
                offline.push_back(outcome.user_id.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// Admit a connection: register it, hand it the presence snapshot, then
    /// tell everyone the user is online.
    pub async fn connect(&self, user_id: &UserId, conn: Arc<dyn Connection>) {
        self.registry.register(user_id, conn.clone()).await;
        self.send_presence_snapshot(user_id, &conn).await;
        self.broadcast(OutboundEvent::status(user_id.clone(), PresenceStatus::Online))
            .await;
    }

    /// Tear down after a connection's relay loop ended. Announces offline
    /// only if this was the user's last connection.
    pub async fn disconnect(&self, user_id: &UserId, conn_id: ConnectionId) -> Removal {
        let removal = self.registry.unregister(user_id, conn_id).await;
        if removal == Removal::WentOffline {
            self.broadcast(OutboundEvent::status(user_id.clone(), PresenceStatus::Offline))
                .await;
        }
        removal
    }

    /// Close every connection of a user (ban, deletion, logout) and announce
    /// offline if any were open. Returns how many connections were closed.
    pub async fn force_offline(&self, user_id: &UserId) -> usize {
        let closed = self.registry.close_all(user_id).await;
        if closed > 0 {
            self.broadcast(OutboundEvent::status(user_id.clone(), PresenceStatus::Offline))
                .await;
        }
        closed
    }
}

fn deliver(targets: &[(UserId, Arc<dyn Connection>)], event: &OutboundEvent) -> Vec<ConnectionOutcome> {
    targets
        .iter()
        .map(|(user_id, conn)| ConnectionOutcome {
            user_id: user_id.clone(),
            connection_id: conn.id(),
            result: conn.send(event),
        })
        .collect()
}
