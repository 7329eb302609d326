//! In-process providers for the channel and clock contracts
//!
//! Used by tests and single-process deployments: every member of a group
//! shares one [`LocalChannel`] and one [`LocalBlockCounter`].

use crate::channel::{BroadcastChannel, Envelope};
use crate::clock::BlockCounter;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{ProtocolError, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

/// Broadcast channel fanning envelopes out to in-process subscribers
pub struct LocalChannel {
    name: String,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Envelope>>>,
}

impl LocalChannel {
    /// Create a shared channel
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[async_trait]
impl BroadcastChannel for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        let mut subscribers = self.subscribers.lock();
        // Closed receivers are pruned on the way.
        subscribers.retain(|subscriber| subscriber.send(envelope.clone()).is_ok());
        trace!(channel = %self.name, tag = %envelope.tag, recipients = subscribers.len(), "Broadcast envelope");
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Envelope> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(sender);
        receiver
    }
}

/// Block counter advanced manually or by a ticker task
#[derive(Clone)]
pub struct LocalBlockCounter {
    sender: Arc<watch::Sender<u64>>,
    receiver: watch::Receiver<u64>,
}

impl LocalBlockCounter {
    /// Counter starting at block zero
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(0);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Produce one block
    pub fn advance(&self) {
        self.advance_by(1);
    }

    /// Produce `blocks` blocks at once
    pub fn advance_by(&self, blocks: u64) {
        self.sender.send_modify(|height| *height += blocks);
    }

    /// Produce a block every `period` until the returned task is aborted
    pub fn spawn_ticker(&self, period: Duration) -> JoinHandle<()> {
        let counter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // A stalled runtime must not release a burst of blocks at once.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                counter.advance();
            }
        })
    }
}

impl Default for LocalBlockCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockCounter for LocalBlockCounter {
    fn current_block(&self) -> u64 {
        *self.receiver.borrow()
    }

    async fn wait_for_block_height(&self, height: u64) -> Result<()> {
        let mut receiver = self.receiver.clone();
        loop {
            let current = *receiver.borrow_and_update();
            if current >= height {
                return Ok(());
            }
            receiver
                .changed()
                .await
                .map_err(|_| ProtocolError::chain("block counter stopped"))?;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_resolves_once_height_is_reached() {
        let counter = LocalBlockCounter::new();
        let waiter = counter.clone();

        let wait = waiter.wait_for_block_height(3);
        let produce = async {
            for _ in 0..3 {
                tokio::task::yield_now().await;
                counter.advance();
            }
        };

        let (reached, ()) = tokio::join!(wait, produce);
        reached.unwrap();
        assert_eq!(counter.current_block(), 3);
    }

    #[tokio::test]
    async fn test_past_height_resolves_immediately() {
        let counter = LocalBlockCounter::new();
        counter.advance_by(10);
        counter.wait_for_block_height(4).await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_runtime_does_not_release_a_block_burst() {
        let counter = LocalBlockCounter::new();
        let ticker = counter.spawn_ticker(Duration::from_millis(10));
        tokio::task::yield_now().await;

        // Block the only worker for ten periods.
        std::thread::sleep(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(2)).await;
        ticker.abort();

        assert!(counter.current_block() <= 2, "burst of {} blocks", counter.current_block());
    }

    #[tokio::test]
    async fn test_channel_delivers_to_every_subscriber() {
        let channel = LocalChannel::new("group-1");
        let mut first = channel.subscribe();
        let mut second = channel.subscribe();

        let envelope = Envelope {
            tag: "t".to_string(),
            payload: vec![7],
        };
        channel.send(envelope.clone()).await.unwrap();

        assert_eq!(first.recv().await.unwrap(), envelope);
        assert_eq!(second.recv().await.unwrap(), envelope);

        drop(first);
        channel.send(envelope).await.unwrap();
        assert_eq!(channel.subscriber_count(), 1);
    }
}
