use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use murmur_shared::types::MessageId;

/// Issues strictly ascending message ids from the wall clock in
/// milliseconds. Bursts within one millisecond, or a clock that steps
/// backwards, continue from the last issued id.
#[derive(Debug, Default)]
pub struct MessageClock {
    last: AtomicI64,
}

impl MessageClock {
    /// Start after `seed`, typically the highest id already stored.
    pub fn starting_after(seed: Option<MessageId>) -> Self {
        Self {
            last: AtomicI64::new(seed.map(|id| id.0).unwrap_or(0)),
        }
    }

    pub fn next_id(&self) -> MessageId {
        self.next_at(Utc::now().timestamp_millis())
    }

    fn next_at(&self, now_ms: i64) -> MessageId {
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now_ms.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        MessageId(now_ms.max(prev + 1))
    }
}

/// Display-only `HH:MM` stamp in server local time.
pub fn display_time() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}
