//! In-memory fan-out of notifications to active NDJSON stream subscribers.

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::jsonrpc::Notification;

const SUBSCRIBER_CHANNEL_DEPTH: usize = 256;

struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<String>,
}

/// Fan-out broadcaster: each `/rpc/stream` connection owns one bounded
/// `mpsc` sender; `broadcast` writes to every subscriber and unsubscribes
/// any whose channel is closed or full.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: RwLock<Vec<Subscriber>>,
}

pub struct Subscription {
    pub id: Uuid,
    pub rx: mpsc::Receiver<String>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_DEPTH);
        self.subscribers.write().push(Subscriber { id, tx });
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.write().retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Serialize `notification` as one NDJSON line and deliver it to every
    /// subscriber, dropping any whose channel is closed or saturated.
    pub fn broadcast(&self, notification: &Notification) {
        let Ok(mut line) = serde_json::to_string(notification) else {
            return;
        };
        line.push('\n');

        let mut dead = Vec::new();
        {
            let subs = self.subscribers.read();
            for sub in subs.iter() {
                if sub.tx.try_send(line.clone()).is_err() {
                    dead.push(sub.id);
                }
            }
        }
        if !dead.is_empty() {
            self.subscribers.write().retain(|s| !dead.contains(&s.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn broadcast_delivers_to_all_subscribers() {
        let b = Broadcaster::new();
        let mut s1 = b.subscribe();
        let mut s2 = b.subscribe();
        b.broadcast(&Notification::new("thread/started", json!({"thread_id": "t1"})));

        let l1 = s1.rx.recv().await.unwrap();
        let l2 = s2.rx.recv().await.unwrap();
        assert!(l1.contains("thread/started"));
        assert!(l2.contains("thread/started"));
    }

    #[test]
    fn unsubscribe_removes_the_subscriber() {
        let b = Broadcaster::new();
        let sub = b.subscribe();
        assert_eq!(b.subscriber_count(), 1);
        b.unsubscribe(sub.id);
        assert_eq!(b.subscriber_count(), 0);
    }
}
