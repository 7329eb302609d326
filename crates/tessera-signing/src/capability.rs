//! Signing capability contract
//!
//! The multiparty signing arithmetic is opaque to the round driver. A
//! capability produces one broadcast payload and one payload per peer each
//! round, absorbs the peers' payloads and finally yields the signature.
//! The driver owns encryption of per-peer payloads and cancels a stalled
//! `start_round` at the round deadline. When finalization names a faulty
//! peer the driver excludes it and restarts the capability from round zero.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tessera_core::{MemberIndex, ProtocolError, Result};
use tessera_crypto::SIGNATURE_SIZE;

/// What this member contributes to one signing round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundOutput {
    /// Payload every member sees
    pub broadcast: Vec<u8>,
    /// Plaintext payload per peer; the driver encrypts each one
    pub peer_payloads: BTreeMap<MemberIndex, Vec<u8>>,
}

/// One peer's contribution to a signing round, already decrypted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundInput {
    /// Contributing peer
    pub sender: MemberIndex,
    /// The peer's broadcast payload
    pub broadcast: Vec<u8>,
    /// The payload the peer addressed to this member
    pub peer_payload: Vec<u8>,
}

/// Opaque multiparty signing computation driven round by round
#[async_trait]
pub trait SigningCapability: Send {
    /// Number of signing rounds
    fn rounds(&self) -> u8;

    /// Produce this member's contribution to `round` for `peers`
    async fn start_round(&mut self, round: u8, peers: &[MemberIndex]) -> Result<RoundOutput>;

    /// Absorb one peer's contribution to `round`. Malformed input is
    /// reported as `ProtocolError::InvalidMessage`.
    fn absorb(&mut self, round: u8, input: RoundInput) -> Result<()>;

    /// Whether every peer the round started with has contributed
    fn is_round_complete(&self, round: u8) -> bool;

    /// Aggregate the final signature.
    ///
    /// A peer whose contribution is missing or breaks aggregation is
    /// reported as `ProtocolError::InvalidMessage` naming that peer.
    fn finalize(&mut self) -> Result<[u8; SIGNATURE_SIZE]>;

    /// Discard all per-attempt state so the rounds can run again with a
    /// smaller set of peers
    fn restart(&mut self) -> Result<()> {
        Err(ProtocolError::capability("capability cannot restart signing"))
    }
}
