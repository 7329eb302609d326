//! Member-side key generation logic
//!
//! [`JoiningMember`] covers the join round. Once the member generates its
//! ephemeral keys it becomes a [`DkgMember`], which carries every phase
//! from symmetric key derivation to combination. The phase methods are
//! synchronous and take already-collected messages, so the states only
//! deal with timing and collection.
//!
//! Each member keeps its own [`Group`] view. Every disqualification is
//! derived from broadcast data alone, so honest members' views agree.

use crate::evidence::{recover_symmetric_key, resolve_accusation, RevealedKey};
use crate::messages::{
    decode_points, DisqualifiedEphemeralKeysMessage, JoinMessage, MemberCommitmentsMessage,
    MemberPublicKeySharePointsMessage, PeerSharesMessage, PointsAccusationsMessage,
    SecretSharesAccusationsMessage,
};
use crate::result::DkgResult;
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use tessera_core::{Group, MemberIndex, ProtocolError, Result};
use tessera_crypto::{
    decode_scalar, encode_point, feldman_points, lagrange_interpolate,
    pedersen_commitments, verify_feldman_share, verify_pedersen_share, EdwardsPoint, Polynomial,
    PrivateKeyShare, Scalar, SymmetricKey, SCALAR_SIZE,
};
use tessera_protocol::{disqualify_incomplete_senders, EphemeralPublicKeyMessage, PairwiseKeys};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Share pair `(s_ij, t_ij)` one member dealt to another
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct ShareRecord {
    pub(crate) share: Scalar,
    pub(crate) blinding: Scalar,
}

impl ShareRecord {
    const ENCODED_SIZE: usize = 2 * SCALAR_SIZE;

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::ENCODED_SIZE);
        bytes.extend_from_slice(&self.share.to_bytes());
        bytes.extend_from_slice(&self.blinding.to_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_SIZE {
            return None;
        }
        let (share, blinding) = bytes.split_at(SCALAR_SIZE);
        Some(Self {
            share: decode_scalar(share.try_into().ok()?).ok()?,
            blinding: decode_scalar(blinding.try_into().ok()?).ok()?,
        })
    }
}

/// Member taking part in the join round
#[derive(Debug)]
pub struct JoiningMember {
    id: MemberIndex,
    group: Group,
    session_id: String,
}

impl JoiningMember {
    /// Member `id` of `group` in session `session_id`
    pub fn new(id: MemberIndex, group: Group, session_id: impl Into<String>) -> Result<Self> {
        if !group.is_member(id) {
            return Err(ProtocolError::invalid_group(format!(
                "member [{id}] is not part of a group of {}",
                group.group_size()
            )));
        }
        Ok(Self {
            id,
            group,
            session_id: session_id.into(),
        })
    }

    /// Member index
    pub fn id(&self) -> MemberIndex {
        self.id
    }

    /// Current group view
    pub fn group(&self) -> &Group {
        &self.group
    }

    pub(crate) fn group_mut(&mut self) -> &mut Group {
        &mut self.group
    }

    /// Session scope
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Announcement for the join round
    pub fn join_message(&self) -> JoinMessage {
        JoinMessage {
            sender: self.id,
            session_id: self.session_id.clone(),
        }
    }

    /// Sample the secret and blinding polynomials, generate one ephemeral
    /// key pair for every other group member and move on to the key
    /// generation proper.
    pub fn generate_ephemeral_key_pair<R: RngCore + CryptoRng>(
        self,
        rng: &mut R,
    ) -> (DkgMember, EphemeralPublicKeyMessage) {
        let roster = self.group.member_indices().to_vec();
        let degree = self.group.dishonest_threshold();
        let secret = Polynomial::random(degree, rng);
        let blinding = Polynomial::random(degree, rng);

        let (keys, message) = PairwiseKeys::generate(self.id, &self.session_id, &roster, rng);

        info!(
            member = %self.id,
            peers = roster.len().saturating_sub(1),
            "Generated ephemeral key pairs and polynomials"
        );

        let member = DkgMember {
            id: self.id,
            group: self.group,
            session_id: self.session_id,
            keys,
            roster,
            ephemeral_messages: BTreeMap::from([(self.id, message.clone())]),
            secret,
            blinding,
            commitments: BTreeMap::new(),
            peer_shares: BTreeMap::new(),
            received_shares: BTreeMap::new(),
            qualified: Vec::new(),
            points: BTreeMap::new(),
            reconstructed: BTreeMap::new(),
        };
        (member, message)
    }
}

/// Member running the key generation phases
pub struct DkgMember {
    id: MemberIndex,
    group: Group,
    session_id: String,
    keys: PairwiseKeys,
    /// Every group member, the set ephemeral keys must cover
    roster: Vec<MemberIndex>,
    ephemeral_messages: BTreeMap<MemberIndex, EphemeralPublicKeyMessage>,
    secret: Polynomial,
    blinding: Polynomial,
    commitments: BTreeMap<MemberIndex, Vec<EdwardsPoint>>,
    peer_shares: BTreeMap<MemberIndex, PeerSharesMessage>,
    /// Verified shares dealt to this member, own included
    received_shares: BTreeMap<MemberIndex, ShareRecord>,
    qualified: Vec<MemberIndex>,
    points: BTreeMap<MemberIndex, Vec<EdwardsPoint>>,
    /// Shares of misbehaving members' polynomials recovered from reveals
    reconstructed: BTreeMap<MemberIndex, Vec<(MemberIndex, Scalar)>>,
}

impl DkgMember {
    /// Member index
    pub fn id(&self) -> MemberIndex {
        self.id
    }

    /// Current group view
    pub fn group(&self) -> &Group {
        &self.group
    }

    pub(crate) fn group_mut(&mut self) -> &mut Group {
        &mut self.group
    }

    /// Session scope
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Pairwise keys of this member
    pub fn keys(&self) -> &PairwiseKeys {
        &self.keys
    }

    /// Members whose polynomials make up the group key, fixed once share
    /// accusations are resolved
    pub fn qualified(&self) -> &[MemberIndex] {
        &self.qualified
    }

    /// Derive a symmetric key with every operating peer.
    ///
    /// A message lacking a key for this member disqualifies its sender and
    /// is reported as an error once every message has been processed. A
    /// message lacking a key for any other group member is public evidence and
    /// disqualifies its sender in every view.
    pub fn generate_symmetric_keys(&mut self, messages: Vec<EphemeralPublicKeyMessage>) -> Result<()> {
        for message in messages {
            if message.sender != self.id && self.group.is_operating(message.sender) {
                self.ephemeral_messages.insert(message.sender, message);
            }
        }

        let messages: Vec<EphemeralPublicKeyMessage> = self
            .ephemeral_messages
            .values()
            .filter(|message| message.sender != self.id)
            .cloned()
            .collect();

        let derived = self.keys.generate_symmetric_keys(&mut self.group, &messages);
        for sender in disqualify_incomplete_senders(&mut self.group, &self.roster, &messages) {
            warn!(member = %self.id, sender = %sender, "Disqualified sender of incomplete ephemeral keys");
        }

        debug!(
            member = %self.id,
            symmetric_keys = self.keys.symmetric_keys().len(),
            "Derived symmetric keys"
        );
        derived
    }

    /// Pedersen commitments to both polynomials and the share pairs for
    /// every operating peer, each encrypted under the pair's symmetric key.
    pub fn commit(&mut self) -> Result<(MemberCommitmentsMessage, PeerSharesMessage)> {
        let commitments = pedersen_commitments(&self.secret, &self.blinding);

        let mut shares = BTreeMap::new();
        for peer in self.group.operating_peers(self.id) {
            let record = self.deal(peer);
            let ciphertext = self.keys.symmetric_key(peer)?.encrypt(&record.to_bytes())?;
            shares.insert(peer, ciphertext);
        }

        let own = self.deal(self.id);
        self.received_shares.insert(self.id, own);

        let commitments_message = MemberCommitmentsMessage {
            sender: self.id,
            session_id: self.session_id.clone(),
            commitments: commitments.iter().map(encode_point).collect(),
        };
        let shares_message = PeerSharesMessage {
            sender: self.id,
            session_id: self.session_id.clone(),
            shares,
        };

        self.commitments.insert(self.id, commitments);
        self.peer_shares.insert(self.id, shares_message.clone());

        debug!(member = %self.id, peers = shares_message.shares.len(), "Committed to polynomials");
        Ok((commitments_message, shares_message))
    }

    /// Store peers' commitments and encrypted shares. Operating peers that
    /// sent malformed commitments or missed either message are disqualified.
    pub fn record_commitments(
        &mut self,
        commitments: &BTreeMap<MemberIndex, MemberCommitmentsMessage>,
        shares: &BTreeMap<MemberIndex, PeerSharesMessage>,
    ) {
        let expected = self.group.dishonest_threshold() + 1;

        for peer in self.group.operating_peers(self.id) {
            let decoded = commitments
                .get(&peer)
                .and_then(|message| decode_points(&message.commitments))
                .filter(|points| points.len() == expected);

            match (decoded, shares.get(&peer)) {
                (Some(points), Some(message)) => {
                    self.commitments.insert(peer, points);
                    self.peer_shares.insert(peer, message.clone());
                }
                _ => {
                    warn!(member = %self.id, peer = %peer, "Missing or malformed commitments");
                    self.group.disqualify(peer);
                }
            }
        }
    }

    /// Decrypt and verify every share dealt to this member. Each failure
    /// becomes an accusation carrying this member's ephemeral private key
    /// for the pair.
    pub fn verify_received_shares(&mut self) -> Result<SecretSharesAccusationsMessage> {
        let mut accused_members_keys = BTreeMap::new();

        for peer in self.group.operating_peers(self.id) {
            let key = self.keys.symmetric_key(peer)?;
            match self.open_share(peer, self.id, key) {
                Some(record) => {
                    self.received_shares.insert(peer, record);
                }
                None => {
                    warn!(member = %self.id, peer = %peer, "Share failed verification");
                    if let Some(pair) = self.keys.ephemeral_key_pair(peer) {
                        accused_members_keys.insert(peer, pair.private_key.to_bytes());
                    }
                }
            }
        }

        Ok(SecretSharesAccusationsMessage {
            sender: self.id,
            session_id: self.session_id.clone(),
            accused_members_keys,
        })
    }

    /// Settle share accusations, fix the qualified set and require at
    /// least `d + 1` qualified members.
    ///
    /// Verdicts are reached against the group view at the start of the
    /// round and applied together, so message order does not matter.
    /// `accusations` includes this member's own message.
    pub fn resolve_secret_shares_accusations(
        &mut self,
        accusations: &BTreeMap<MemberIndex, SecretSharesAccusationsMessage>,
    ) -> Result<()> {
        let mut culprits = Vec::new();
        for (accuser, message) in accusations {
            if !self.group.is_operating(*accuser) {
                continue;
            }
            for (accused, revealed) in &message.accused_members_keys {
                if !self.group.is_operating(*accused) {
                    continue;
                }
                let culprit = resolve_accusation(
                    &self.ephemeral_messages,
                    *accuser,
                    *accused,
                    revealed,
                    |key| self.open_share(*accused, *accuser, key).is_none(),
                );
                info!(
                    member = %self.id,
                    accuser = %accuser,
                    accused = %accused,
                    culprit = %culprit,
                    "Resolved share accusation"
                );
                culprits.push(culprit);
            }
        }
        for culprit in culprits {
            self.group.disqualify(culprit);
        }

        self.disqualify_silent(accusations);

        self.qualified = self.group.operating_members();
        let qualified = &self.qualified;
        self.received_shares.retain(|sender, _| qualified.contains(sender));

        self.group
            .ensure_quorum("shares justification", self.group.dishonest_threshold() + 1)
    }

    /// Feldman points `A_k = a_k·G` of this member's secret polynomial
    pub fn share_points(&mut self) -> MemberPublicKeySharePointsMessage {
        let points = feldman_points(&self.secret);
        let message = MemberPublicKeySharePointsMessage {
            sender: self.id,
            session_id: self.session_id.clone(),
            public_key_share_points: points.iter().map(encode_point).collect(),
        };
        self.points.insert(self.id, points);
        message
    }

    /// Store qualified peers' points. Malformed or missing points
    /// disqualify the sender, whose secret will then be reconstructed.
    pub fn record_points(&mut self, messages: &BTreeMap<MemberIndex, MemberPublicKeySharePointsMessage>) {
        let expected = self.group.dishonest_threshold() + 1;

        for peer in self.qualified.clone() {
            if peer == self.id || !self.group.is_operating(peer) {
                continue;
            }
            let decoded = messages
                .get(&peer)
                .and_then(|message| decode_points(&message.public_key_share_points))
                .filter(|points| points.len() == expected);

            match decoded {
                Some(points) => {
                    self.points.insert(peer, points);
                }
                None => {
                    warn!(member = %self.id, peer = %peer, "Missing or malformed points");
                    self.group.disqualify(peer);
                }
            }
        }
    }

    /// Check every peer's points against the share it dealt this member
    pub fn validate_points(&self) -> PointsAccusationsMessage {
        let mut accused_members_keys = BTreeMap::new();

        for (peer, points) in &self.points {
            if *peer == self.id || !self.group.is_operating(*peer) {
                continue;
            }
            let Some(record) = self.received_shares.get(peer) else {
                continue;
            };
            if !verify_feldman_share(points, self.id, &record.share) {
                warn!(member = %self.id, peer = %peer, "Points do not match dealt share");
                if let Some(pair) = self.keys.ephemeral_key_pair(*peer) {
                    accused_members_keys.insert(*peer, pair.private_key.to_bytes());
                }
            }
        }

        PointsAccusationsMessage {
            sender: self.id,
            session_id: self.session_id.clone(),
            accused_members_keys,
        }
    }

    /// Settle points accusations. A guilty member loses its points, so its
    /// secret gets reconstructed; a false accuser is disqualified but its
    /// points stand.
    pub fn resolve_points_accusations(
        &mut self,
        accusations: &BTreeMap<MemberIndex, PointsAccusationsMessage>,
    ) {
        let mut culprits = Vec::new();
        for (accuser, message) in accusations {
            if !self.group.is_operating(*accuser) {
                continue;
            }
            for (accused, revealed) in &message.accused_members_keys {
                let Some(points) = self.points.get(accused) else {
                    continue;
                };
                let culprit = resolve_accusation(
                    &self.ephemeral_messages,
                    *accuser,
                    *accused,
                    revealed,
                    |key| match self.open_share(*accused, *accuser, key) {
                        Some(record) => !verify_feldman_share(points, *accuser, &record.share),
                        None => true,
                    },
                );
                info!(
                    member = %self.id,
                    accuser = %accuser,
                    accused = %accused,
                    culprit = %culprit,
                    "Resolved points accusation"
                );
                culprits.push((culprit, culprit == *accused));
            }
        }
        for (culprit, points_invalid) in culprits {
            if points_invalid {
                self.points.remove(&culprit);
            }
            self.group.disqualify(culprit);
        }

        self.disqualify_silent(accusations);
    }

    /// Qualified members without valid points
    pub fn misbehaved_members(&self) -> Vec<MemberIndex> {
        self.qualified
            .iter()
            .copied()
            .filter(|member| !self.points.contains_key(member))
            .collect()
    }

    /// Reveal the ephemeral private keys generated for misbehaving members.
    /// Sent even when empty so silence stays detectable.
    pub fn reveal_ephemeral_keys(&self) -> DisqualifiedEphemeralKeysMessage {
        let private_keys = self
            .misbehaved_members()
            .into_iter()
            .filter_map(|member| {
                self.keys
                    .ephemeral_key_pair(member)
                    .map(|pair| (member, pair.private_key.to_bytes()))
            })
            .collect();

        DisqualifiedEphemeralKeysMessage {
            sender: self.id,
            session_id: self.session_id.clone(),
            private_keys,
        }
    }

    /// Recover the shares misbehaving members dealt, from this member's own
    /// share plus every share unlocked by a revealed key. Forged reveals
    /// disqualify the revealer; at least `d + 1` shares are needed per
    /// misbehaving member.
    pub fn reconstruct_individual_keys(
        &mut self,
        reveals: &BTreeMap<MemberIndex, DisqualifiedEphemeralKeysMessage>,
    ) -> Result<()> {
        self.disqualify_silent(reveals);
        let required = self.group.dishonest_threshold() + 1;

        for misbehaved in self.misbehaved_members() {
            let mut shares: Vec<(MemberIndex, Scalar)> = self
                .received_shares
                .get(&misbehaved)
                .map(|record| vec![(self.id, record.share)])
                .unwrap_or_default();

            for (revealer, message) in reveals {
                if *revealer == self.id || *revealer == misbehaved {
                    continue;
                }
                let Some(revealed) = message.private_keys.get(&misbehaved) else {
                    continue;
                };
                match recover_symmetric_key(&self.ephemeral_messages, *revealer, misbehaved, revealed) {
                    RevealedKey::Valid(key) => {
                        if let Some(record) = self.open_share(misbehaved, *revealer, &key) {
                            shares.push((*revealer, record.share));
                        }
                    }
                    RevealedKey::Forged => {
                        warn!(member = %self.id, revealer = %revealer, "Forged ephemeral key reveal");
                        self.group.disqualify(*revealer);
                    }
                    RevealedKey::CounterpartMissing => {}
                }
            }

            if shares.len() < required {
                return Err(ProtocolError::InsufficientQuorum {
                    phase: "reconstruction".to_string(),
                    operating: shares.len(),
                    required,
                });
            }

            info!(
                member = %self.id,
                misbehaved = %misbehaved,
                shares = shares.len(),
                "Reconstructed individual key"
            );
            self.reconstructed.insert(misbehaved, shares);
        }
        Ok(())
    }

    /// Combine the qualified members' contributions into the group public
    /// key and this member's share, and check the two agree.
    pub fn combine(&self) -> Result<DkgResult> {
        if !self.qualified.contains(&self.id) {
            return Err(ProtocolError::invalid_group(format!(
                "member [{}] is not in the qualified set",
                self.id
            )));
        }

        let mut secret_share = Scalar::ZERO;
        for member in &self.qualified {
            let record = self.received_shares.get(member).ok_or_else(|| {
                ProtocolError::invalid_group(format!("no verified share from qualified member [{member}]"))
            })?;
            secret_share += record.share;
        }

        let group_public_key = self
            .qualified
            .iter()
            .map(|member| self.contribution(*member, Scalar::ZERO))
            .sum::<Result<EdwardsPoint>>()?;

        let mut verifying_shares = BTreeMap::new();
        for receiver in &self.qualified {
            let x = Scalar::from(receiver.as_u64());
            let point = self
                .qualified
                .iter()
                .map(|member| self.contribution(*member, x))
                .sum::<Result<EdwardsPoint>>()?;
            verifying_shares.insert(*receiver, point);
        }

        if verifying_shares.get(&self.id) != Some(&EdwardsPoint::mul_base(&secret_share)) {
            return Err(ProtocolError::crypto(
                "combined share does not match the combined public key share",
            ));
        }

        info!(
            member = %self.id,
            qualified = self.qualified.len(),
            "Combined group public key"
        );

        Ok(DkgResult {
            group_public_key: encode_point(&group_public_key),
            private_key_share: PrivateKeyShare::new(
                self.id,
                secret_share,
                &group_public_key,
                &verifying_shares,
                self.group.group_size(),
                self.group.dishonest_threshold(),
            ),
            qualified: self.qualified.clone(),
            disqualified: self.group.disqualified_members(),
            inactive: self.group.inactive_members(),
        })
    }

    /// `f_m(x)·G` for a qualified member, from its points when they are
    /// valid and from reconstructed shares otherwise
    fn contribution(&self, member: MemberIndex, x: Scalar) -> Result<EdwardsPoint> {
        if let Some(points) = self.points.get(&member) {
            let mut power = Scalar::ONE;
            return Ok(points
                .iter()
                .map(|point| {
                    let term = point * power;
                    power *= x;
                    term
                })
                .sum());
        }
        let shares = self.reconstructed.get(&member).ok_or_else(|| {
            ProtocolError::invalid_group(format!("no reconstructed key for member [{member}]"))
        })?;
        let value = lagrange_interpolate(shares, &x)?;
        Ok(EdwardsPoint::mul_base(&value))
    }

    /// Share pair this member deals to `receiver`
    fn deal(&self, receiver: MemberIndex) -> ShareRecord {
        ShareRecord {
            share: self.secret.evaluate_at(receiver),
            blinding: self.blinding.evaluate_at(receiver),
        }
    }

    /// Decrypt the share `sender` dealt `receiver` and verify it against
    /// the sender's commitments
    fn open_share(
        &self,
        sender: MemberIndex,
        receiver: MemberIndex,
        key: &SymmetricKey,
    ) -> Option<ShareRecord> {
        let ciphertext = self.peer_shares.get(&sender)?.shares.get(&receiver)?;
        let commitments = self.commitments.get(&sender)?;
        let plaintext = key.decrypt(ciphertext).ok()?;
        let record = ShareRecord::from_bytes(&plaintext)?;
        verify_pedersen_share(commitments, receiver, &record.share, &record.blinding).then_some(record)
    }

    /// Disqualify operating peers absent from a mandatory round
    fn disqualify_silent<T>(&mut self, received: &BTreeMap<MemberIndex, T>) {
        for peer in self.group.operating_peers(self.id) {
            if !received.contains_key(&peer) {
                warn!(member = %self.id, peer = %peer, "Disqualified silent member");
                self.group.disqualify(peer);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    const SESSION: &str = "dkg-session";

    fn idx(i: u16) -> MemberIndex {
        MemberIndex::new(i)
    }

    fn by_sender<T: Clone>(messages: &[(MemberIndex, T)]) -> BTreeMap<MemberIndex, T> {
        messages.iter().cloned().collect()
    }

    /// Members of a fresh group with symmetric keys derived
    fn members_with_keys(dishonest_threshold: usize, group_size: usize) -> Vec<DkgMember> {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let group = Group::new(dishonest_threshold, group_size).unwrap();

        let (mut members, messages): (Vec<_>, Vec<_>) = group
            .member_indices()
            .iter()
            .map(|id| {
                JoiningMember::new(*id, group.clone(), SESSION)
                    .unwrap()
                    .generate_ephemeral_key_pair(&mut rng)
            })
            .unzip();

        for member in &mut members {
            member.generate_symmetric_keys(messages.clone()).unwrap();
        }
        members
    }

    /// Run commitment and share verification, letting `tamper` edit the
    /// broadcast share messages first
    fn commit_and_verify(
        members: &mut [DkgMember],
        tamper: impl Fn(&mut BTreeMap<MemberIndex, PeerSharesMessage>),
    ) -> BTreeMap<MemberIndex, SecretSharesAccusationsMessage> {
        let mut commitments = BTreeMap::new();
        let mut shares = BTreeMap::new();
        for member in members.iter_mut() {
            let (c, s) = member.commit().unwrap();
            commitments.insert(member.id(), c);
            shares.insert(member.id(), s);
        }
        tamper(&mut shares);

        members
            .iter_mut()
            .map(|member| {
                let mut peer_shares = shares.clone();
                peer_shares.remove(&member.id());
                member.record_commitments(&commitments, &peer_shares);
                (member.id(), member.verify_received_shares().unwrap())
            })
            .collect()
    }

    /// Run the remaining phases through combination
    fn finish(
        members: &mut [DkgMember],
        accusations: &BTreeMap<MemberIndex, SecretSharesAccusationsMessage>,
    ) -> Vec<DkgResult> {
        for member in members.iter_mut() {
            member.resolve_secret_shares_accusations(accusations).unwrap();
        }
        let points: Vec<_> = members.iter_mut().map(|m| (m.id(), m.share_points())).collect();
        let points = by_sender(&points);
        finish_from_points(members, &points)
    }

    fn finish_from_points(
        members: &mut [DkgMember],
        points: &BTreeMap<MemberIndex, MemberPublicKeySharePointsMessage>,
    ) -> Vec<DkgResult> {
        for member in members.iter_mut() {
            member.record_points(points);
        }
        let accusations: Vec<_> = members.iter().map(|m| (m.id(), m.validate_points())).collect();
        let accusations = by_sender(&accusations);
        for member in members.iter_mut() {
            member.resolve_points_accusations(&accusations);
        }
        let reveals: Vec<_> = members
            .iter()
            .map(|m| (m.id(), m.reveal_ephemeral_keys()))
            .collect();
        let reveals = by_sender(&reveals);
        members
            .iter_mut()
            .map(|member| {
                member.reconstruct_individual_keys(&reveals).unwrap();
                member.combine().unwrap()
            })
            .collect()
    }

    fn expected_group_key(members: &[DkgMember], qualified: &[MemberIndex]) -> [u8; 32] {
        let secret: Scalar = members
            .iter()
            .filter(|m| qualified.contains(&m.id()))
            .map(|m| m.secret.coefficients()[0])
            .sum();
        encode_point(&EdwardsPoint::mul_base(&secret))
    }

    #[test]
    fn test_symmetric_keys_are_pairwise_equal() {
        let members = members_with_keys(1, 3);
        for a in &members {
            assert_eq!(a.keys().symmetric_keys().len(), 2);
            for b in &members {
                if a.id() != b.id() {
                    assert_eq!(
                        a.keys().symmetric_key(b.id()).unwrap(),
                        b.keys().symmetric_key(a.id()).unwrap()
                    );
                }
            }
        }
    }

    #[test]
    fn test_honest_members_agree_on_the_group_key() {
        let mut members = members_with_keys(1, 3);
        let accusations = commit_and_verify(&mut members, |_| {});
        assert!(accusations.values().all(|a| a.accused_members_keys.is_empty()));

        let results = finish(&mut members, &accusations);
        let expected = expected_group_key(&members, &[idx(1), idx(2), idx(3)]);
        for result in &results {
            assert_eq!(result.group_public_key, expected);
            assert_eq!(result.qualified, vec![idx(1), idx(2), idx(3)]);
            assert!(result.disqualified.is_empty());
        }

        // Any d + 1 shares interpolate to the group secret.
        let shares: Vec<_> = results[..2]
            .iter()
            .map(|r| (r.private_key_share.member(), *r.private_key_share.secret_share()))
            .collect();
        let secret = lagrange_interpolate(&shares, &Scalar::ZERO).unwrap();
        assert_eq!(encode_point(&EdwardsPoint::mul_base(&secret)), expected);
    }

    #[test]
    fn test_bad_share_gets_dealer_disqualified() {
        let mut members = members_with_keys(1, 4);
        let pair_key = members[0].keys().symmetric_key(idx(2)).unwrap().clone();

        // Member 2 deals member 1 a share that does not match its commitments.
        let forged = ShareRecord {
            share: Scalar::from(5u64),
            blinding: Scalar::from(6u64),
        };
        let ciphertext = pair_key.encrypt(&forged.to_bytes()).unwrap();
        let accusations = commit_and_verify(&mut members, |shares| {
            shares
                .get_mut(&idx(2))
                .unwrap()
                .shares
                .insert(idx(1), ciphertext.clone());
        });

        assert_eq!(
            accusations[&idx(1)].accused_members_keys.keys().collect::<Vec<_>>(),
            vec![&idx(2)]
        );

        // Member 2 still holds its untampered message, so only the honest
        // views are checked.
        members.remove(1);
        let results = finish(&mut members, &accusations);
        let qualified = vec![idx(1), idx(3), idx(4)];
        let expected = expected_group_key(&members, &qualified);
        for result in &results {
            assert_eq!(result.qualified, qualified);
            assert_eq!(result.disqualified, vec![idx(2)]);
            assert_eq!(result.group_public_key, expected);
        }
    }

    #[test]
    fn test_false_accusation_disqualifies_accuser() {
        let mut members = members_with_keys(1, 4);
        let mut accusations = commit_and_verify(&mut members, |_| {});

        let evidence = members[0]
            .keys()
            .ephemeral_key_pair(idx(3))
            .unwrap()
            .private_key
            .to_bytes();
        accusations
            .get_mut(&idx(1))
            .unwrap()
            .accused_members_keys
            .insert(idx(3), evidence);

        for member in members.iter_mut() {
            member.resolve_secret_shares_accusations(&accusations).unwrap();
            assert!(member.group().is_disqualified(idx(1)));
            assert!(!member.group().is_disqualified(idx(3)));
            assert_eq!(member.qualified(), &[idx(2), idx(3), idx(4)]);
        }
    }

    #[test]
    fn test_bad_points_get_reconstructed() {
        let mut members = members_with_keys(1, 4);
        let accusations = commit_and_verify(&mut members, |_| {});
        for member in members.iter_mut() {
            member.resolve_secret_shares_accusations(&accusations).unwrap();
        }

        let mut points: BTreeMap<_, _> = members
            .iter_mut()
            .map(|m| (m.id(), m.share_points()))
            .collect();
        // Member 4 publishes points of an unrelated polynomial.
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let unrelated = feldman_points(&Polynomial::random(1, &mut rng));
        points.get_mut(&idx(4)).unwrap().public_key_share_points =
            unrelated.iter().map(encode_point).collect();

        let results = finish_from_points(&mut members[..3], &points);

        // Member 4's secret still counts, recovered from the honest shares.
        let expected = expected_group_key(&members, &[idx(1), idx(2), idx(3), idx(4)]);
        for result in &results {
            assert_eq!(result.group_public_key, expected);
            assert_eq!(result.disqualified, vec![idx(4)]);
        }
    }

    #[test]
    fn test_too_few_qualified_members_fails() {
        let mut members = members_with_keys(2, 3);
        let accusations = commit_and_verify(&mut members, |_| {});

        let mut only_own = BTreeMap::new();
        only_own.insert(idx(1), accusations[&idx(1)].clone());

        let error = members[0]
            .resolve_secret_shares_accusations(&only_own)
            .unwrap_err();
        assert_matches!(
            error,
            ProtocolError::InsufficientQuorum { operating: 1, required: 3, .. }
        );
    }

    #[test]
    fn test_missing_key_for_member_is_reported() {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let group = Group::new(0, 3).unwrap();
        let (mut members, mut messages): (Vec<_>, Vec<_>) = group
            .member_indices()
            .iter()
            .map(|id| {
                JoiningMember::new(*id, group.clone(), SESSION)
                    .unwrap()
                    .generate_ephemeral_key_pair(&mut rng)
            })
            .unzip();
        messages[2].ephemeral_public_keys.remove(&idx(1));

        let error = members[0].generate_symmetric_keys(messages.clone()).unwrap_err();
        assert_matches!(error, ProtocolError::InvalidEphemeralPublicKeyMessage { sender } if sender == idx(3));

        // Member 2 holds a key with member 3 but disqualifies it on the
        // public evidence anyway.
        members[1].generate_symmetric_keys(messages).unwrap();
        assert!(members[1].group().is_disqualified(idx(3)));
    }

    #[test]
    fn test_diverging_views_still_cover_every_member() {
        let mut rng = ChaCha20Rng::seed_from_u64(12);
        let group = Group::new(1, 4).unwrap();
        let mut narrow = group.clone();
        narrow.mark_inactive(idx(4));

        let (mut members, messages): (Vec<_>, Vec<_>) = group
            .member_indices()
            .iter()
            .map(|id| {
                let view = if *id == idx(1) { narrow.clone() } else { group.clone() };
                JoiningMember::new(*id, view, SESSION)
                    .unwrap()
                    .generate_ephemeral_key_pair(&mut rng)
            })
            .unzip();

        assert_eq!(members[0].keys().ephemeral_key_pairs().len(), 3);
        assert_eq!(messages[0].ephemeral_public_keys.len(), 3);

        for member in members.iter_mut().skip(1) {
            member.generate_symmetric_keys(messages.clone()).unwrap();
            assert!(member.group().is_operating(idx(1)));
            assert_eq!(member.keys().symmetric_keys().len(), 3);
        }
    }

    #[test]
    fn test_outsider_cannot_join() {
        let group = Group::new(0, 3).unwrap();
        assert_matches!(
            JoiningMember::new(idx(4), group, SESSION),
            Err(ProtocolError::InvalidGroup { .. })
        );
    }
}
