//! Key generation states
//!
//! Message-bearing states collect one message per operating peer and hand
//! the batch to the member when the round closes. Computation-only states
//! take no blocks. Silence in the join and ephemeral key rounds marks a
//! member inactive; silence in any later round disqualifies it.

use crate::member::{DkgMember, JoiningMember};
use crate::messages::{
    round, DisqualifiedEphemeralKeysMessage, DkgMessage, MemberCommitmentsMessage,
    MemberPublicKeySharePointsMessage, PeerSharesMessage, PointsAccusationsMessage,
    SecretSharesAccusationsMessage,
};
use crate::result::DkgResult;
use async_trait::async_trait;
use rand::rngs::OsRng;
use std::collections::{BTreeMap, BTreeSet};
use tessera_core::{Group, MemberIndex, ProtocolError, Result};
use tessera_protocol::{DkgTiming, EphemeralPublicKeyMessage, ProtocolMessage, State, Step};
use tracing::{info, warn};

type DkgStep = Step<DkgMessage, DkgResult>;

/// Accessors every state derives from its member
macro_rules! member_accessors {
    ($name:literal, $round:expr) => {
        fn name(&self) -> &'static str {
            $name
        }

        fn round(&self) -> u8 {
            $round
        }

        fn member_index(&self) -> MemberIndex {
            self.member.id()
        }

        fn group(&self) -> &Group {
            self.member.group()
        }
    };
}

fn unexpected(message: &DkgMessage, state: &str) -> ProtocolError {
    ProtocolError::invalid_message(message.sender(), format!("unexpected message in {state}"))
}

/// Whether every operating peer of `member` is present in `heard`
fn heard_from_all<T>(group: &Group, member: MemberIndex, heard: &BTreeMap<MemberIndex, T>) -> bool {
    group
        .operating_peers(member)
        .iter()
        .all(|peer| heard.contains_key(peer))
}

fn ensure_dkg_quorum(group: &Group, phase: &str) -> Result<()> {
    group.ensure_quorum(phase, group.dishonest_threshold() + 1)
}

/// Entry state: announce participation
pub struct JoinState {
    member: JoiningMember,
    timing: DkgTiming,
    joined: BTreeSet<MemberIndex>,
}

impl JoinState {
    /// Initial state for `member`
    pub fn new(member: JoiningMember, timing: DkgTiming) -> Self {
        Self {
            member,
            timing,
            joined: BTreeSet::new(),
        }
    }
}

#[async_trait]
impl State<DkgMessage, DkgResult> for JoinState {
    member_accessors!("join", round::JOIN);

    fn active_blocks(&self) -> u64 {
        self.timing.join_blocks
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        Ok(vec![self.member.join_message().into()])
    }

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        match message {
            DkgMessage::Join(join) => {
                self.joined.insert(join.sender);
                Ok(())
            }
            other => Err(unexpected(&other, "join")),
        }
    }

    fn is_complete(&self) -> bool {
        self.member
            .group()
            .operating_peers(self.member.id())
            .iter()
            .all(|peer| self.joined.contains(peer))
    }

    fn next(mut self: Box<Self>) -> Result<DkgStep> {
        let id = self.member.id();
        for peer in self.member.group().operating_peers(id) {
            if !self.joined.contains(&peer) {
                warn!(member = %id, peer = %peer, "Member did not join");
                self.member.group_mut().mark_inactive(peer);
            }
        }
        ensure_dkg_quorum(self.member.group(), "join")?;

        info!(member = %id, joined = self.joined.len() + 1, "Join round closed");
        let (member, announcement) = self.member.generate_ephemeral_key_pair(&mut OsRng);
        Ok(Step::Continue(Box::new(EphemeralKeyPairGenerationState {
            member,
            timing: self.timing,
            announcement: Some(announcement),
            received: BTreeMap::new(),
        })))
    }
}

/// Broadcast ephemeral public keys and collect the peers'
pub struct EphemeralKeyPairGenerationState {
    member: DkgMember,
    timing: DkgTiming,
    announcement: Option<EphemeralPublicKeyMessage>,
    received: BTreeMap<MemberIndex, EphemeralPublicKeyMessage>,
}

#[async_trait]
impl State<DkgMessage, DkgResult> for EphemeralKeyPairGenerationState {
    member_accessors!("ephemeral_key_pair_generation", round::EPHEMERAL_KEY_PAIR_GENERATION);

    fn active_blocks(&self) -> u64 {
        self.timing.ephemeral_key_blocks
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        Ok(self.announcement.take().map(DkgMessage::from).into_iter().collect())
    }

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        match message {
            DkgMessage::EphemeralPublicKey(keys) => {
                self.received.insert(keys.sender, keys);
                Ok(())
            }
            other => Err(unexpected(&other, self.name())),
        }
    }

    fn is_complete(&self) -> bool {
        heard_from_all(self.member.group(), self.member.id(), &self.received)
    }

    fn next(mut self: Box<Self>) -> Result<DkgStep> {
        let id = self.member.id();
        for peer in self.member.group().operating_peers(id) {
            if !self.received.contains_key(&peer) {
                warn!(member = %id, peer = %peer, "No ephemeral public keys received");
                self.member.group_mut().mark_inactive(peer);
            }
        }
        ensure_dkg_quorum(self.member.group(), "ephemeral key pair generation")?;

        Ok(Step::Continue(Box::new(SymmetricKeyGenerationState {
            member: self.member,
            timing: self.timing,
            received: self.received.into_values().collect(),
        })))
    }
}

/// Derive symmetric keys from the collected ephemeral public keys
pub struct SymmetricKeyGenerationState {
    member: DkgMember,
    timing: DkgTiming,
    received: Vec<EphemeralPublicKeyMessage>,
}

#[async_trait]
impl State<DkgMessage, DkgResult> for SymmetricKeyGenerationState {
    member_accessors!("symmetric_key_generation", round::SYMMETRIC_KEY_GENERATION);

    fn active_blocks(&self) -> u64 {
        0
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        let received = std::mem::take(&mut self.received);
        match self.member.generate_symmetric_keys(received) {
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

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        Err(unexpected(&message, self.name()))
    }

    fn next(self: Box<Self>) -> Result<DkgStep> {
        ensure_dkg_quorum(self.member.group(), "symmetric key generation")?;
        Ok(Step::Continue(Box::new(CommitmentState {
            member: self.member,
            timing: self.timing,
            commitments: BTreeMap::new(),
            shares: BTreeMap::new(),
        })))
    }
}

/// Broadcast commitments and encrypted shares
pub struct CommitmentState {
    member: DkgMember,
    timing: DkgTiming,
    commitments: BTreeMap<MemberIndex, MemberCommitmentsMessage>,
    shares: BTreeMap<MemberIndex, PeerSharesMessage>,
}

#[async_trait]
impl State<DkgMessage, DkgResult> for CommitmentState {
    member_accessors!("commitment", round::COMMITMENT);

    fn active_blocks(&self) -> u64 {
        self.timing.commitment_blocks
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        let (commitments, shares) = self.member.commit()?;
        Ok(vec![commitments.into(), shares.into()])
    }

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        match message {
            DkgMessage::MemberCommitments(commitments) => {
                self.commitments.insert(commitments.sender, commitments);
                Ok(())
            }
            DkgMessage::PeerShares(shares) => {
                self.shares.insert(shares.sender, shares);
                Ok(())
            }
            other => Err(unexpected(&other, self.name())),
        }
    }

    fn is_complete(&self) -> bool {
        let (group, id) = (self.member.group(), self.member.id());
        heard_from_all(group, id, &self.commitments) && heard_from_all(group, id, &self.shares)
    }

    fn next(mut self: Box<Self>) -> Result<DkgStep> {
        self.member.record_commitments(&self.commitments, &self.shares);
        ensure_dkg_quorum(self.member.group(), "commitment")?;
        Ok(Step::Continue(Box::new(CommitmentsVerificationState {
            member: self.member,
            timing: self.timing,
            accusations: BTreeMap::new(),
        })))
    }
}

/// Verify received shares and broadcast accusations
pub struct CommitmentsVerificationState {
    member: DkgMember,
    timing: DkgTiming,
    accusations: BTreeMap<MemberIndex, SecretSharesAccusationsMessage>,
}

#[async_trait]
impl State<DkgMessage, DkgResult> for CommitmentsVerificationState {
    member_accessors!("commitments_verification", round::COMMITMENTS_VERIFICATION);

    fn active_blocks(&self) -> u64 {
        self.timing.accusation_blocks
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        let accusations = self.member.verify_received_shares()?;
        self.accusations.insert(self.member.id(), accusations.clone());
        Ok(vec![accusations.into()])
    }

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        match message {
            DkgMessage::SecretSharesAccusations(accusations) => {
                self.accusations.insert(accusations.sender, accusations);
                Ok(())
            }
            other => Err(unexpected(&other, self.name())),
        }
    }

    fn is_complete(&self) -> bool {
        heard_from_all(self.member.group(), self.member.id(), &self.accusations)
    }

    fn next(self: Box<Self>) -> Result<DkgStep> {
        Ok(Step::Continue(Box::new(SharesJustificationState {
            member: self.member,
            timing: self.timing,
            accusations: self.accusations,
        })))
    }
}

/// Resolve share accusations and fix the qualified set
pub struct SharesJustificationState {
    member: DkgMember,
    timing: DkgTiming,
    accusations: BTreeMap<MemberIndex, SecretSharesAccusationsMessage>,
}

#[async_trait]
impl State<DkgMessage, DkgResult> for SharesJustificationState {
    member_accessors!("shares_justification", round::SHARES_JUSTIFICATION);

    fn active_blocks(&self) -> u64 {
        0
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        self.member
            .resolve_secret_shares_accusations(&self.accusations)?;
        Ok(Vec::new())
    }

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        Err(unexpected(&message, self.name()))
    }

    fn next(self: Box<Self>) -> Result<DkgStep> {
        Ok(Step::Continue(Box::new(PointsSharingState {
            member: self.member,
            timing: self.timing,
            points: BTreeMap::new(),
        })))
    }
}

/// Broadcast Feldman points
pub struct PointsSharingState {
    member: DkgMember,
    timing: DkgTiming,
    points: BTreeMap<MemberIndex, MemberPublicKeySharePointsMessage>,
}

#[async_trait]
impl State<DkgMessage, DkgResult> for PointsSharingState {
    member_accessors!("points_sharing", round::POINTS_SHARING);

    fn active_blocks(&self) -> u64 {
        self.timing.points_blocks
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        Ok(vec![self.member.share_points().into()])
    }

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        match message {
            DkgMessage::MemberPublicKeySharePoints(points) => {
                self.points.insert(points.sender, points);
                Ok(())
            }
            other => Err(unexpected(&other, self.name())),
        }
    }

    fn is_complete(&self) -> bool {
        heard_from_all(self.member.group(), self.member.id(), &self.points)
    }

    fn next(mut self: Box<Self>) -> Result<DkgStep> {
        self.member.record_points(&self.points);
        Ok(Step::Continue(Box::new(PointsValidationState {
            member: self.member,
            timing: self.timing,
            accusations: BTreeMap::new(),
        })))
    }
}

/// Validate points against received shares and broadcast accusations
pub struct PointsValidationState {
    member: DkgMember,
    timing: DkgTiming,
    accusations: BTreeMap<MemberIndex, PointsAccusationsMessage>,
}

#[async_trait]
impl State<DkgMessage, DkgResult> for PointsValidationState {
    member_accessors!("points_validation", round::POINTS_VALIDATION);

    fn active_blocks(&self) -> u64 {
        self.timing.accusation_blocks
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        let accusations = self.member.validate_points();
        self.accusations.insert(self.member.id(), accusations.clone());
        Ok(vec![accusations.into()])
    }

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        match message {
            DkgMessage::PointsAccusations(accusations) => {
                self.accusations.insert(accusations.sender, accusations);
                Ok(())
            }
            other => Err(unexpected(&other, self.name())),
        }
    }

    fn is_complete(&self) -> bool {
        heard_from_all(self.member.group(), self.member.id(), &self.accusations)
    }

    fn next(self: Box<Self>) -> Result<DkgStep> {
        Ok(Step::Continue(Box::new(PointsJustificationState {
            member: self.member,
            timing: self.timing,
            accusations: self.accusations,
        })))
    }
}

/// Resolve points accusations
pub struct PointsJustificationState {
    member: DkgMember,
    timing: DkgTiming,
    accusations: BTreeMap<MemberIndex, PointsAccusationsMessage>,
}

#[async_trait]
impl State<DkgMessage, DkgResult> for PointsJustificationState {
    member_accessors!("points_justification", round::POINTS_JUSTIFICATION);

    fn active_blocks(&self) -> u64 {
        0
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        self.member.resolve_points_accusations(&self.accusations);
        Ok(Vec::new())
    }

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        Err(unexpected(&message, self.name()))
    }

    fn next(self: Box<Self>) -> Result<DkgStep> {
        Ok(Step::Continue(Box::new(KeyRevealingState {
            member: self.member,
            timing: self.timing,
            reveals: BTreeMap::new(),
        })))
    }
}

/// Reveal ephemeral private keys generated for misbehaving members
pub struct KeyRevealingState {
    member: DkgMember,
    timing: DkgTiming,
    reveals: BTreeMap<MemberIndex, DisqualifiedEphemeralKeysMessage>,
}

#[async_trait]
impl State<DkgMessage, DkgResult> for KeyRevealingState {
    member_accessors!("key_revealing", round::KEY_REVEALING);

    fn active_blocks(&self) -> u64 {
        self.timing.reveal_blocks
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        let reveal = self.member.reveal_ephemeral_keys();
        if !reveal.private_keys.is_empty() {
            info!(
                member = %self.member.id(),
                revealed = reveal.private_keys.len(),
                "Revealing ephemeral keys of misbehaving members"
            );
        }
        Ok(vec![reveal.into()])
    }

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        match message {
            DkgMessage::DisqualifiedEphemeralKeys(reveal) => {
                self.reveals.insert(reveal.sender, reveal);
                Ok(())
            }
            other => Err(unexpected(&other, self.name())),
        }
    }

    fn is_complete(&self) -> bool {
        heard_from_all(self.member.group(), self.member.id(), &self.reveals)
    }

    fn next(self: Box<Self>) -> Result<DkgStep> {
        Ok(Step::Continue(Box::new(ReconstructionState {
            member: self.member,
            reveals: self.reveals,
        })))
    }
}

/// Reconstruct misbehaving members' individual keys
pub struct ReconstructionState {
    member: DkgMember,
    reveals: BTreeMap<MemberIndex, DisqualifiedEphemeralKeysMessage>,
}

#[async_trait]
impl State<DkgMessage, DkgResult> for ReconstructionState {
    member_accessors!("reconstruction", round::RECONSTRUCTION);

    fn active_blocks(&self) -> u64 {
        0
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        self.member.reconstruct_individual_keys(&self.reveals)?;
        Ok(Vec::new())
    }

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        Err(unexpected(&message, self.name()))
    }

    fn next(self: Box<Self>) -> Result<DkgStep> {
        Ok(Step::Continue(Box::new(CombinationState {
            member: self.member,
            result: None,
        })))
    }
}

/// Combine the group public key and this member's share
pub struct CombinationState {
    member: DkgMember,
    result: Option<DkgResult>,
}

#[async_trait]
impl State<DkgMessage, DkgResult> for CombinationState {
    member_accessors!("combination", round::COMBINATION);

    fn active_blocks(&self) -> u64 {
        0
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        self.result = Some(self.member.combine()?);
        Ok(Vec::new())
    }

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        Err(unexpected(&message, self.name()))
    }

    fn next(self: Box<Self>) -> Result<DkgStep> {
        let result = self
            .result
            .ok_or_else(|| ProtocolError::invalid_group("combination produced no result"))?;
        Ok(Step::Continue(Box::new(FinalizationState {
            member: self.member,
            result,
        })))
    }
}

/// Final quorum check and result hand-off
pub struct FinalizationState {
    member: DkgMember,
    result: DkgResult,
}

#[async_trait]
impl State<DkgMessage, DkgResult> for FinalizationState {
    member_accessors!("finalization", round::FINALIZATION);

    fn active_blocks(&self) -> u64 {
        0
    }

    async fn initiate(&mut self) -> Result<Vec<DkgMessage>> {
        Ok(Vec::new())
    }

    fn receive(&mut self, message: DkgMessage) -> Result<()> {
        Err(unexpected(&message, self.name()))
    }

    fn next(self: Box<Self>) -> Result<DkgStep> {
        let operating = self.member.group().operating_members().len();
        if self.result.qualified.len() <= self.member.group().dishonest_threshold() {
            return Err(ProtocolError::InsufficientQuorum {
                phase: "finalization".to_string(),
                operating,
                required: self.member.group().dishonest_threshold() + 1,
            });
        }

        info!(
            member = %self.member.id(),
            qualified = self.result.qualified.len(),
            disqualified = self.result.disqualified.len(),
            inactive = self.result.inactive.len(),
            "Key generation finished"
        );
        Ok(Step::Done(self.result))
    }
}
