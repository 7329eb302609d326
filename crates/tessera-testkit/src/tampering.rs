//! Broadcast channel that lets a test rewrite envelopes before delivery.
//!
//! Models a malicious sender: the rewritten envelope reaches every
//! subscriber, while the sender's own state machine keeps the original.

use async_trait::async_trait;
use std::sync::Arc;
use tessera_core::Result;
use tessera_protocol::{BroadcastChannel, Envelope};
use tokio::sync::mpsc;
use tracing::debug;

type Rewrite = Box<dyn Fn(Envelope) -> Envelope + Send + Sync>;

/// Channel passing every outgoing envelope through a rewrite function
pub struct TamperingChannel {
    inner: Arc<dyn BroadcastChannel>,
    rewrite: Rewrite,
}

impl TamperingChannel {
    /// Wrap `inner`, rewriting each envelope with `rewrite`
    pub fn new(
        inner: Arc<dyn BroadcastChannel>,
        rewrite: impl Fn(Envelope) -> Envelope + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner,
            rewrite: Box::new(rewrite),
        })
    }
}

#[async_trait]
impl BroadcastChannel for TamperingChannel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        let rewritten = (self.rewrite)(envelope.clone());
        if rewritten != envelope {
            debug!(channel = self.inner.name(), tag = %envelope.tag, "Tampered with envelope");
        }
        self.inner.send(rewritten).await
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<Envelope> {
        self.inner.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_protocol::LocalChannel;

    #[tokio::test]
    async fn test_subscribers_see_the_rewritten_envelope() {
        let inner = LocalChannel::new("tampering");
        let channel = TamperingChannel::new(inner, |mut envelope: Envelope| {
            envelope.payload.reverse();
            envelope
        });
        let mut receiver = channel.subscribe();

        channel
            .send(Envelope {
                tag: "test".to_string(),
                payload: vec![1, 2, 3],
            })
            .await
            .unwrap();

        assert_eq!(receiver.recv().await.unwrap().payload, vec![3, 2, 1]);
    }
}
