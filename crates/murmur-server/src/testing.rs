//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use murmur_shared::protocol::OutboundEvent;
use serde_json::Value;

use crate::error::DeliveryError;
use crate::registry::{next_connection_id, Connection, ConnectionId};

/// A connection that records every event it is sent. It can be switched
/// into a failing mode to simulate a dead peer.
pub struct RecordingConnection {
    id: ConnectionId,
    events: Mutex<Vec<OutboundEvent>>,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: next_connection_id(),
            events: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Recorded events as JSON values.
    pub fn frames(&self) -> Vec<Value> {
        self.events()
            .iter()
            .map(|e| serde_json::to_value(e).unwrap())
            .collect()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.events().iter().map(|e| e.kind().to_string()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Connection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, event: &OutboundEvent) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) || self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn close(&self) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Closed);
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
