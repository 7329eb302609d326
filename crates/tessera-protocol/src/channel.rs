//! Broadcast channel contract
//!
//! The transport moves opaque [`Envelope`]s. Each protocol defines a closed
//! set of message variants ([`ProtocolMessage`]) and registers one decoder
//! per wire tag in a [`MessageRegistry`] at session setup; envelopes with
//! unregistered tags never reach the protocol.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::{MemberIndex, ProtocolError, Result};
use tokio::sync::mpsc;
use tracing::debug;

/// Wire frame: a message tag and its encoded body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Tag selecting the decoder
    pub tag: String,
    /// Encoded message body
    pub payload: Vec<u8>,
}

/// Authenticated group broadcast
///
/// Sends are fire-and-forget; every subscriber receives every envelope in
/// per-sender order, including the sender's own.
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    /// Channel name, usually scoped to one group
    fn name(&self) -> &str;

    /// Broadcast an envelope to the whole group
    async fn send(&self, envelope: Envelope) -> Result<()>;

    /// Open an unbounded receiver for envelopes sent from now on
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Envelope>;
}

/// Message body with a fixed wire tag
pub trait TaggedMessage: Serialize + DeserializeOwned {
    /// Wire tag
    const TAG: &'static str;

    /// Encode into an envelope
    fn encode(&self) -> Result<Envelope> {
        Ok(Envelope {
            tag: Self::TAG.to_string(),
            payload: bincode::serialize(self)?,
        })
    }
}

/// Closed set of messages one protocol exchanges
pub trait ProtocolMessage: Send + Sync + 'static {
    /// Member that produced the message
    fn sender(&self) -> MemberIndex;

    /// Session the message belongs to
    fn session_id(&self) -> &str;

    /// Round whose state consumes the message
    fn round(&self) -> u8;

    /// Encode the concrete variant
    fn to_envelope(&self) -> Result<Envelope>;
}

type Decoder<M> = fn(&[u8]) -> Result<M>;

fn decode_as<T, M>(bytes: &[u8]) -> Result<M>
where
    T: TaggedMessage + Into<M>,
{
    let message: T = bincode::deserialize(bytes)?;
    Ok(message.into())
}

/// Dispatch table from wire tag to decoder
pub struct MessageRegistry<M> {
    decoders: HashMap<String, Decoder<M>>,
}

impl<M: ProtocolMessage> MessageRegistry<M> {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register the decoder for `T` under its tag
    pub fn register<T>(&mut self) -> &mut Self
    where
        T: TaggedMessage + Into<M> + 'static,
    {
        self.decoders.insert(T::TAG.to_string(), decode_as::<T, M>);
        self
    }

    /// Whether a decoder exists for `tag`
    pub fn is_registered(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    /// Decode an envelope with the decoder registered for its tag
    pub fn decode(&self, envelope: &Envelope) -> Result<M> {
        let decoder = self.decoders.get(envelope.tag.as_str()).ok_or_else(|| {
            ProtocolError::serialization(format!("unregistered message tag {}", envelope.tag))
        })?;
        decoder(&envelope.payload)
    }
}

impl<M: ProtocolMessage> Default for MessageRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Broadcast channel speaking one protocol's messages
pub struct TypedChannel<M> {
    channel: Arc<dyn BroadcastChannel>,
    registry: Arc<MessageRegistry<M>>,
}

impl<M: ProtocolMessage> TypedChannel<M> {
    /// Wrap a raw channel with a protocol registry
    pub fn new(channel: Arc<dyn BroadcastChannel>, registry: MessageRegistry<M>) -> Self {
        Self {
            channel,
            registry: Arc::new(registry),
        }
    }

    /// Underlying channel name
    pub fn name(&self) -> &str {
        self.channel.name()
    }

    /// Encode and broadcast a message
    pub async fn send(&self, message: &M) -> Result<()> {
        let envelope = message.to_envelope()?;
        self.channel.send(envelope).await
    }

    /// Subscribe to decoded messages
    pub fn subscribe(&self) -> TypedReceiver<M> {
        TypedReceiver {
            inner: self.channel.subscribe(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<M> Clone for TypedChannel<M> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Receiving half of a [`TypedChannel`]
pub struct TypedReceiver<M> {
    inner: mpsc::UnboundedReceiver<Envelope>,
    registry: Arc<MessageRegistry<M>>,
}

impl<M: ProtocolMessage> TypedReceiver<M> {
    /// Next decodable message, or `None` once the channel closes.
    ///
    /// Cancel safe: the only await point is the underlying receiver.
    pub async fn recv(&mut self) -> Option<M> {
        loop {
            let envelope = self.inner.recv().await?;
            match self.registry.decode(&envelope) {
                Ok(message) => return Some(message),
                Err(error) => {
                    debug!(tag = %envelope.tag, error = %error, "Dropping undecodable envelope");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::local::LocalChannel;
    use assert_matches::assert_matches;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Ping {
        sender: MemberIndex,
        session_id: String,
    }

    impl TaggedMessage for Ping {
        const TAG: &'static str = "test/ping";
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestMessage {
        Ping(Ping),
    }

    impl From<Ping> for TestMessage {
        fn from(message: Ping) -> Self {
            Self::Ping(message)
        }
    }

    impl ProtocolMessage for TestMessage {
        fn sender(&self) -> MemberIndex {
            match self {
                Self::Ping(m) => m.sender,
            }
        }

        fn session_id(&self) -> &str {
            match self {
                Self::Ping(m) => &m.session_id,
            }
        }

        fn round(&self) -> u8 {
            0
        }

        fn to_envelope(&self) -> Result<Envelope> {
            match self {
                Self::Ping(m) => m.encode(),
            }
        }
    }

    fn registry() -> MessageRegistry<TestMessage> {
        let mut registry = MessageRegistry::new();
        registry.register::<Ping>();
        registry
    }

    #[test]
    fn test_registry_decodes_registered_tags_only() {
        let registry = registry();
        let ping = Ping {
            sender: MemberIndex::new(1),
            session_id: "s".to_string(),
        };

        assert!(registry.is_registered(Ping::TAG));
        assert_eq!(
            registry.decode(&ping.encode().unwrap()).unwrap(),
            TestMessage::Ping(ping)
        );

        let unknown = Envelope {
            tag: "test/unknown".to_string(),
            payload: vec![],
        };
        assert_matches!(
            registry.decode(&unknown),
            Err(ProtocolError::Serialization { .. })
        );
    }

    #[tokio::test]
    async fn test_typed_receiver_skips_unregistered_envelopes() {
        let raw = LocalChannel::new("test");
        let channel = TypedChannel::new(raw.clone(), registry());
        let mut receiver = channel.subscribe();

        raw.send(Envelope {
            tag: "test/unknown".to_string(),
            payload: vec![1, 2, 3],
        })
        .await
        .unwrap();

        let ping = TestMessage::Ping(Ping {
            sender: MemberIndex::new(2),
            session_id: "s".to_string(),
        });
        channel.send(&ping).await.unwrap();

        assert_eq!(receiver.recv().await.unwrap(), ping);
    }
}
