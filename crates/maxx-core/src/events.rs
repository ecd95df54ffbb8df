use serde::Serialize;
use tokio::sync::broadcast;

/// Broadcast events surfaced to the admin WebSocket. Progress events are
/// best-effort: lagging receivers drop frames rather than blocking the
/// sender.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    QuotaUpdated { provider_id: i64 },
    CodexQuotaUpdated { provider_id: i64 },
    RoutesUpdated { project_id: i64, client_type: String },
    RecalculateStatsProgress { done: u64, total: u64 },
    RecalculateCostsProgress { done: u64, total: u64, errors: u64 },
    AntigravityOauthResult { provider_id: i64, ok: bool },
    CodexOauthResult { provider_id: i64, ok: bool },
}

const EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<Event>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Fire-and-forget; an event with no subscribers is simply dropped.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let hub = EventHub::new();
        let mut receiver = hub.subscribe();
        hub.publish(Event::QuotaUpdated { provider_id: 7 });
        match receiver.recv().await.unwrap() {
            Event::QuotaUpdated { provider_id } => assert_eq!(provider_id, 7),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let hub = EventHub::new();
        hub.publish(Event::RecalculateCostsProgress {
            done: 1,
            total: 2,
            errors: 0,
        });
    }
}
