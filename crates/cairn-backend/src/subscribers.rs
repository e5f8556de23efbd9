//! Bounded event fan-out
//!
//! Each subscriber gets its own bounded channel. Publishing never blocks:
//! a full channel drops the event for that subscriber, a closed channel
//! removes the subscriber.

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

pub struct Subscribers<T> {
    senders: Arc<RwLock<Vec<mpsc::Sender<T>>>>,
    capacity: usize,
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            senders: Arc::clone(&self.senders),
            capacity: self.capacity,
        }
    }
}

impl<T: Clone + Send + std::fmt::Debug> Subscribers<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: Arc::new(RwLock::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber. Closed subscribers are pruned first so
    /// repeated subscriptions don't accumulate.
    pub async fn subscribe(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut senders = self.senders.write().await;
        senders.retain(|existing| !existing.is_closed());
        senders.push(tx);
        debug!(
            capacity = self.capacity,
            total = senders.len(),
            "New event subscriber registered"
        );
        rx
    }

    pub async fn publish(&self, event: T) {
        let mut senders = self.senders.write().await;
        let mut dropped = 0;
        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                dropped += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if dropped > 0 {
            warn!(
                "Dropped event {:?} for {} slow subscriber(s) - channel(s) full",
                event, dropped
            );
        }
    }

    pub async fn len(&self) -> usize {
        self.senders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every subscriber, closing their channels.
    pub async fn clear(&self) {
        self.senders.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let subscribers = Subscribers::new(4);
        let mut a = subscribers.subscribe().await;
        let mut b = subscribers.subscribe().await;

        subscribers.publish("break".to_string()).await;

        assert_eq!(a.recv().await.as_deref(), Some("break"));
        assert_eq!(b.recv().await.as_deref(), Some("break"));
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let subscribers = Subscribers::new(4);
        let dropped = subscribers.subscribe().await;
        let _kept = subscribers.subscribe().await;
        drop(dropped);

        subscribers.publish(1u32).await;
        assert_eq!(subscribers.len().await, 1);
    }

    #[tokio::test]
    async fn test_full_channel_drops_event_but_keeps_subscriber() {
        let subscribers = Subscribers::new(1);
        let mut rx = subscribers.subscribe().await;

        subscribers.publish(1u32).await;
        subscribers.publish(2u32).await;

        assert_eq!(subscribers.len().await, 1);
        assert_eq!(rx.recv().await, Some(1));
        assert!(rx.try_recv().is_err());
    }
}
