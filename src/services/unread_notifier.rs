//! In-process fan-out of unread-count changes.
//!
//! Each subscriber gets a channel with room for a single event, so a slow
//! subscriber stalls the publisher until it drains. Subscribers that go away
//! must be unsubscribed (or drop their receiver) so publishes stop waiting on
//! them. There is no replay: new subscribers read the current snapshot from
//! the store.

use crate::models::UnreadCount;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex};

/// Receiving end handed out by [`UnreadCountNotifier::subscribe`].
#[derive(Debug)]
pub struct UnreadCountSubscription {
    id: u64,
    receiver: mpsc::Receiver<UnreadCount>,
}

impl UnreadCountSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<UnreadCount> {
        self.receiver.recv().await
    }
}

#[derive(Debug, Default)]
pub struct UnreadCountNotifier {
    subscribers: Mutex<Vec<(u64, mpsc::Sender<UnreadCount>)>>,
    next_id: AtomicU64,
}

impl UnreadCountNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self) -> UnreadCountSubscription {
        let (sender, receiver) = mpsc::channel(1);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().await.push((id, sender));
        UnreadCountSubscription { id, receiver }
    }

    /// Remove a subscriber. Publishes already waiting on it are released.
    pub async fn unsubscribe(&self, subscription: UnreadCountSubscription) {
        self.subscribers
            .lock()
            .await
            .retain(|(id, _)| *id != subscription.id);
        drop(subscription);
    }

    /// Deliver `count` to every current subscriber, waiting on each in turn.
    pub async fn publish(&self, count: UnreadCount) {
        let targets: Vec<(u64, mpsc::Sender<UnreadCount>)> =
            self.subscribers.lock().await.clone();

        let mut closed = Vec::new();
        for (id, sender) in targets {
            if sender.send(count).await.is_err() {
                closed.push(id);
            }
        }

        if !closed.is_empty() {
            log::debug!("[notifier] Pruning {} closed subscribers", closed.len());
            self.subscribers
                .lock()
                .await
                .retain(|(id, _)| !closed.contains(id));
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}
