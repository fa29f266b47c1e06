//! Reply broadcast bus
//!
//! Long-lived publish/subscribe channel mirroring completed replies to any
//! number of passive listeners, independent of the request/response path.
//! Delivery is best-effort: a slow subscriber loses its oldest undelivered
//! items (the channel's lag behavior) and the publisher never blocks.

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
pub struct ReplySummary {
    pub persona: String,
    pub session_id: String,
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    pub ts: i64,
}

impl ReplySummary {
    pub fn new(persona: &str, session_id: &str, reply: &str, tone: Option<String>) -> Self {
        Self {
            persona: persona.to_string(),
            session_id: session_id.to_string(),
            reply: reply.to_string(),
            tone,
            ts: Utc::now().timestamp(),
        }
    }
}

#[derive(Clone)]
pub struct ReplyBus {
    tx: broadcast::Sender<ReplySummary>,
}

impl ReplyBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a completed reply. Having no subscribers is not an error.
    pub fn publish(&self, summary: ReplySummary) {
        let _ = self.tx.send(summary);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplySummary> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn test_subscriber_receives_published_reply() {
        let bus = ReplyBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(ReplySummary::new("domino", "s1", "lights on", None));

        let summary = rx.recv().await.unwrap();
        assert_eq!(summary.persona, "domino");
        assert_eq!(summary.reply, "lights on");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = ReplyBus::new(8);
        bus.publish(ReplySummary::new("penny", "s1", "hello", None));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let bus = ReplyBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(ReplySummary::new("domino", "s1", &format!("msg {}", i), None));
        }

        // The first receive reports the lag; the next delivers the oldest
        // item still retained.
        match rx.recv().await {
            Err(RecvError::Lagged(n)) => assert_eq!(n, 3),
            other => panic!("expected lag, got {:?}", other),
        }
        let summary = rx.recv().await.unwrap();
        assert_eq!(summary.reply, "msg 3");
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_get_a_copy() {
        let bus = ReplyBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(ReplySummary::new("jimmy", "s1", "report", Some("joyful".into())));

        assert_eq!(a.recv().await.unwrap().reply, "report");
        assert_eq!(b.recv().await.unwrap().tone.as_deref(), Some("joyful"));
    }
}
