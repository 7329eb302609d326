//! Signing messages

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_core::{MemberIndex, Result};
use tessera_protocol::{
    EphemeralPublicKeyMessage, Envelope, MessageRegistry, ProtocolMessage, TaggedMessage,
};

/// Round numbers
pub mod round {
    /// Ephemeral public key exchange
    pub const EPHEMERAL_KEY_PAIR_GENERATION: u8 = 0;
    /// Symmetric key derivation
    pub const SYMMETRIC_KEY_GENERATION: u8 = 1;
    /// First capability round; later ones follow consecutively
    pub const FIRST_SIGNING_ROUND: u8 = 2;
}

/// One member's contribution to a signing round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRoundMessage {
    /// Sending member
    pub sender: MemberIndex,
    /// Session scope
    pub session_id: String,
    /// Protocol round the contribution belongs to
    pub round: u8,
    /// Payload every member verifies
    pub broadcast_payload: Vec<u8>,
    /// Encrypted payload per receiver
    pub peer_payloads: BTreeMap<MemberIndex, Vec<u8>>,
}

impl TaggedMessage for SigningRoundMessage {
    const TAG: &'static str = "tessera/signing/round";
}

/// Every message the signing protocol exchanges
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningMessage {
    /// Ephemeral key exchange
    EphemeralPublicKey(EphemeralPublicKeyMessage),
    /// Capability round contribution
    SigningRound(SigningRoundMessage),
}

impl From<EphemeralPublicKeyMessage> for SigningMessage {
    fn from(message: EphemeralPublicKeyMessage) -> Self {
        Self::EphemeralPublicKey(message)
    }
}

impl From<SigningRoundMessage> for SigningMessage {
    fn from(message: SigningRoundMessage) -> Self {
        Self::SigningRound(message)
    }
}

impl ProtocolMessage for SigningMessage {
    fn sender(&self) -> MemberIndex {
        match self {
            Self::EphemeralPublicKey(m) => m.sender,
            Self::SigningRound(m) => m.sender,
        }
    }

    fn session_id(&self) -> &str {
        match self {
            Self::EphemeralPublicKey(m) => &m.session_id,
            Self::SigningRound(m) => &m.session_id,
        }
    }

    fn round(&self) -> u8 {
        match self {
            Self::EphemeralPublicKey(_) => round::EPHEMERAL_KEY_PAIR_GENERATION,
            Self::SigningRound(m) => m.round,
        }
    }

    fn to_envelope(&self) -> Result<Envelope> {
        match self {
            Self::EphemeralPublicKey(m) => m.encode(),
            Self::SigningRound(m) => m.encode(),
        }
    }
}

/// Registry with a decoder for every signing message
pub fn registry() -> MessageRegistry<SigningMessage> {
    let mut registry = MessageRegistry::new();
    registry
        .register::<EphemeralPublicKeyMessage>()
        .register::<SigningRoundMessage>();
    registry
}
