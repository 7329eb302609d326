//! Signing states
//!
//! `EphemeralKeyPairGeneration → SymmetricKeyGeneration → one state per
//! capability round → Finalization`. The capability is handed from state to
//! state together with the member.
//!
//! When finalization names a faulty signer, that signer is disqualified and
//! the capability rounds run again among the rest. Each attempt uses fresh
//! round numbers following the previous attempt's.

use crate::capability::SigningCapability;
use crate::member::SigningMember;
use crate::messages::{round, SigningMessage, SigningRoundMessage};
use crate::result::SigningResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tessera_core::{Group, MemberIndex, ProtocolError, Result};
use tessera_protocol::{EphemeralPublicKeyMessage, ProtocolMessage, SigningTiming, State, Step};
use tracing::{info, warn};

type SigningStep = Step<SigningMessage, SigningResult>;

const SIGNING_ROUND_NAMES: [&str; 4] = [
    "signing_round_1",
    "signing_round_2",
    "signing_round_3",
    "signing_round_4",
];

fn unexpected(message: &SigningMessage, state: &str) -> ProtocolError {
    ProtocolError::invalid_message(message.sender(), format!("unexpected message in {state}"))
}

fn ensure_signing_quorum(group: &Group, phase: &str) -> Result<()> {
    group.ensure_quorum(phase, group.honest_threshold())
}

/// Mark operating peers missing from `heard` inactive
fn mark_silent_inactive<T>(member: &mut SigningMember, heard: &BTreeMap<MemberIndex, T>, phase: &str) {
    let id = member.id();
    for peer in member.group().operating_peers(id) {
        if !heard.contains_key(&peer) {
            warn!(member = %id, peer = %peer, phase, "Member went silent");
            member.group_mut().mark_inactive(peer);
        }
    }
}

/// Broadcast ephemeral public keys and collect the peers'
pub struct EphemeralKeyPairGenerationState {
    member: SigningMember,
    capability: Box<dyn SigningCapability>,
    timing: SigningTiming,
    announcement: Option<EphemeralPublicKeyMessage>,
    received: BTreeMap<MemberIndex, EphemeralPublicKeyMessage>,
}

impl EphemeralKeyPairGenerationState {
    /// Initial state for `member`, announcing `announcement`
    pub fn new(
        member: SigningMember,
        announcement: EphemeralPublicKeyMessage,
        capability: Box<dyn SigningCapability>,
        timing: SigningTiming,
    ) -> Self {
        Self {
            member,
            capability,
            timing,
            announcement: Some(announcement),
            received: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl State<SigningMessage, SigningResult> for EphemeralKeyPairGenerationState {
    fn name(&self) -> &'static str {
        "ephemeral_key_pair_generation"
    }

    fn round(&self) -> u8 {
        round::EPHEMERAL_KEY_PAIR_GENERATION
    }

    fn active_blocks(&self) -> u64 {
        self.timing.ephemeral_key_blocks
    }

    fn member_index(&self) -> MemberIndex {
        self.member.id()
    }

    fn group(&self) -> &Group {
        self.member.group()
    }

    async fn initiate(&mut self) -> Result<Vec<SigningMessage>> {
        Ok(self
            .announcement
            .take()
            .map(SigningMessage::from)
            .into_iter()
            .collect())
    }

    fn receive(&mut self, message: SigningMessage) -> Result<()> {
        match message {
            SigningMessage::EphemeralPublicKey(keys) => {
                self.received.insert(keys.sender, keys);
                Ok(())
            }
            other => Err(unexpected(&other, self.name())),
        }
    }

    fn is_complete(&self) -> bool {
        self.member
            .group()
            .operating_peers(self.member.id())
            .iter()
            .all(|peer| self.received.contains_key(peer))
    }

    fn next(mut self: Box<Self>) -> Result<SigningStep> {
        mark_silent_inactive(&mut self.member, &self.received, "ephemeral key pair generation");
        ensure_signing_quorum(self.member.group(), "ephemeral key pair generation")?;

        Ok(Step::Continue(Box::new(SymmetricKeyGenerationState {
            member: self.member,
            capability: self.capability,
            timing: self.timing,
            received: self.received.into_values().collect(),
        })))
    }
}

/// Derive symmetric keys from the collected ephemeral public keys
pub struct SymmetricKeyGenerationState {
    member: SigningMember,
    capability: Box<dyn SigningCapability>,
    timing: SigningTiming,
    received: Vec<EphemeralPublicKeyMessage>,
}

#[async_trait]
impl State<SigningMessage, SigningResult> for SymmetricKeyGenerationState {
    fn name(&self) -> &'static str {
        "symmetric_key_generation"
    }

    fn round(&self) -> u8 {
        round::SYMMETRIC_KEY_GENERATION
    }

    fn active_blocks(&self) -> u64 {
        0
    }

    fn member_index(&self) -> MemberIndex {
        self.member.id()
    }

    fn group(&self) -> &Group {
        self.member.group()
    }

    async fn initiate(&mut self) -> Result<Vec<SigningMessage>> {
        match self.member.generate_symmetric_keys(&self.received) {
            Err(ProtocolError::InvalidEphemeralPublicKeyMessage { sender }) => {
                warn!(
                    member = %self.member.id(),
                    sender = %sender,
                    "Disqualified sender of invalid ephemeral public key message"
                );
            }
            other => other?,
        }
        Ok(Vec::new())
    }

    fn receive(&mut self, message: SigningMessage) -> Result<()> {
        Err(unexpected(&message, self.name()))
    }

    fn next(self: Box<Self>) -> Result<SigningStep> {
        ensure_signing_quorum(self.member.group(), "symmetric key generation")?;
        Ok(Step::Continue(Box::new(SigningRoundState::new(
            self.member,
            self.capability,
            self.timing,
            round::FIRST_SIGNING_ROUND,
            0,
        ))))
    }
}

/// One capability round: encrypt and broadcast this member's contribution,
/// decrypt and absorb the peers'
pub struct SigningRoundState {
    member: SigningMember,
    capability: Box<dyn SigningCapability>,
    timing: SigningTiming,
    /// Protocol round of the attempt's first capability round
    base_round: u8,
    signing_round: u8,
    heard: BTreeMap<MemberIndex, ()>,
}

impl SigningRoundState {
    /// State for capability round `signing_round` of the attempt starting
    /// at protocol round `base_round`
    pub fn new(
        member: SigningMember,
        capability: Box<dyn SigningCapability>,
        timing: SigningTiming,
        base_round: u8,
        signing_round: u8,
    ) -> Self {
        Self {
            member,
            capability,
            timing,
            base_round,
            signing_round,
            heard: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl State<SigningMessage, SigningResult> for SigningRoundState {
    fn name(&self) -> &'static str {
        SIGNING_ROUND_NAMES
            .get(usize::from(self.signing_round))
            .copied()
            .unwrap_or("signing_round")
    }

    fn round(&self) -> u8 {
        self.base_round.saturating_add(self.signing_round)
    }

    fn active_blocks(&self) -> u64 {
        self.timing.round_blocks
    }

    fn member_index(&self) -> MemberIndex {
        self.member.id()
    }

    fn group(&self) -> &Group {
        self.member.group()
    }

    async fn initiate(&mut self) -> Result<Vec<SigningMessage>> {
        self.member.ensure_symmetric_keys()?;

        let peers = self.member.group().operating_peers(self.member.id());
        let output = self.capability.start_round(self.signing_round, &peers).await?;
        let message: SigningRoundMessage = self.member.package_round(self.round(), output)?;
        Ok(vec![message.into()])
    }

    fn receive(&mut self, message: SigningMessage) -> Result<()> {
        match message {
            SigningMessage::SigningRound(contribution) => {
                let input = self.member.open_round_message(contribution)?;
                let sender = input.sender;
                self.capability.absorb(self.signing_round, input)?;
                self.heard.insert(sender, ());
                Ok(())
            }
            other => Err(unexpected(&other, self.name())),
        }
    }

    fn is_complete(&self) -> bool {
        self.capability.is_round_complete(self.signing_round)
    }

    fn next(mut self: Box<Self>) -> Result<SigningStep> {
        let name = self.name();
        mark_silent_inactive(&mut self.member, &self.heard, name);
        ensure_signing_quorum(self.member.group(), name)?;

        let following = self.signing_round + 1;
        if following < self.capability.rounds() {
            return Ok(Step::Continue(Box::new(SigningRoundState::new(
                self.member,
                self.capability,
                self.timing,
                self.base_round,
                following,
            ))));
        }
        Ok(Step::Continue(Box::new(FinalizationState {
            member: self.member,
            capability: self.capability,
            timing: self.timing,
            base_round: self.base_round,
        })))
    }
}

/// Aggregate the signature, or restart the capability rounds without a
/// signer whose contribution broke aggregation
pub struct FinalizationState {
    member: SigningMember,
    capability: Box<dyn SigningCapability>,
    timing: SigningTiming,
    base_round: u8,
}

impl FinalizationState {
    fn retry_without(mut self: Box<Self>, faulty: MemberIndex, reason: &str) -> Result<SigningStep> {
        let id = self.member.id();
        if faulty == id {
            return Err(ProtocolError::capability(format!("own contribution rejected: {reason}")));
        }
        if self.member.group().is_operating(faulty) {
            warn!(member = %id, faulty = %faulty, reason, "Disqualified signer");
            self.member.group_mut().disqualify(faulty);
        }
        ensure_signing_quorum(self.member.group(), self.name())?;

        let rounds = self.capability.rounds();
        let base_round = self
            .base_round
            .checked_add(rounds)
            .filter(|base| base.checked_add(rounds).is_some())
            .ok_or_else(|| ProtocolError::capability("no round numbers left for another signing attempt"))?;
        self.capability.restart()?;

        info!(
            member = %id,
            signers = self.member.group().operating_members().len(),
            base_round,
            "Restarting signing rounds"
        );
        Ok(Step::Continue(Box::new(SigningRoundState::new(
            self.member,
            self.capability,
            self.timing,
            base_round,
            0,
        ))))
    }
}

#[async_trait]
impl State<SigningMessage, SigningResult> for FinalizationState {
    fn name(&self) -> &'static str {
        "finalization"
    }

    fn round(&self) -> u8 {
        self.base_round.saturating_add(self.capability.rounds())
    }

    fn active_blocks(&self) -> u64 {
        0
    }

    fn member_index(&self) -> MemberIndex {
        self.member.id()
    }

    fn group(&self) -> &Group {
        self.member.group()
    }

    async fn initiate(&mut self) -> Result<Vec<SigningMessage>> {
        Ok(Vec::new())
    }

    fn receive(&mut self, message: SigningMessage) -> Result<()> {
        Err(unexpected(&message, self.name()))
    }

    fn next(mut self: Box<Self>) -> Result<SigningStep> {
        let signature = match self.capability.finalize() {
            Ok(signature) => signature,
            Err(ProtocolError::InvalidMessage { sender, reason }) => {
                return self.retry_without(sender, &reason);
            }
            Err(error) => return Err(error),
        };
        let signers = self.member.group().operating_members();

        info!(member = %self.member.id(), signers = signers.len(), "Signing finished");
        Ok(Step::Done(SigningResult { signature, signers }))
    }
}
