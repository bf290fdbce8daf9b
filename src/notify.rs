use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;
const CHANNEL_PREFIX: &str = "property_";

/// Broadcast hub for LISTEN/NOTIFY, one channel per property.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a property's committed events. Creates the channel if needed.
    pub fn subscribe(&self, property_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(property_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, property_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&property_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels whose listeners have all gone away.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before - self.channels.len()
    }
}

/// `property_<ulid>` → the property id. Case-insensitive.
pub fn parse_channel(channel: &str) -> Option<Ulid> {
    let lower = channel.to_ascii_lowercase();
    let id = lower.strip_prefix(CHANNEL_PREFIX)?;
    Ulid::from_string(id).ok()
}

pub fn channel_name(property_id: Ulid) -> String {
    format!("{CHANNEL_PREFIX}{property_id}")
}

/// JSON body of a NotificationResponse: `{"event": <name>, "data": <event>}`.
pub fn payload(event: &Event) -> String {
    serde_json::json!({ "event": event.name(), "data": event }).to_string()
}
