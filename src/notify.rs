//! Per-room change feed. Mutations publish the applied event; subscribers
//! (one channel per room) get a JSON rendering they can fan out however they
//! like. Lagging subscribers lose old messages rather than backpressure the
//! write path.

use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<String>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<String> {
        self.channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event on the room's channel. No subscribers, no work.
    pub fn send(&self, room_id: Ulid, event: &Event) {
        let Some(tx) = self.channels.get(&room_id) else {
            return;
        };
        if tx.receiver_count() == 0 {
            return;
        }
        match serde_json::to_string(event) {
            Ok(payload) => {
                let _ = tx.send(payload);
            }
            Err(e) => tracing::warn!(%room_id, error = %e, "failed to encode notification"),
        }
    }

    pub fn drop_room(&self, room_id: &Ulid) {
        self.channels.remove(room_id);
    }
}
