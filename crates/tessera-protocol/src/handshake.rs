//! Pairwise channel bootstrap shared by both protocols
//!
//! Every member generates one ephemeral key pair per other group member and
//! broadcasts the public halves in an [`EphemeralPublicKeyMessage`]. Each
//! receiver picks the key addressed to it and runs ECDH with its own private
//! key for that sender, yielding a symmetric key both ends agree on.
//!
//! The key maps never contain the member's own index. Key pairs are written
//! once during generation and symmetric keys once during derivation; both
//! are read-only afterwards.

use crate::channel::TaggedMessage;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_core::{Group, MemberIndex, ProtocolError, Result};
use tessera_crypto::{KeyPair, PublicKey, SymmetricKey, POINT_SIZE};
use tracing::{debug, warn};

/// One ephemeral public key per peer of the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralPublicKeyMessage {
    /// Sending member
    pub sender: MemberIndex,
    /// Session scope
    pub session_id: String,
    /// Compressed public key generated for each receiver
    pub ephemeral_public_keys: BTreeMap<MemberIndex, [u8; POINT_SIZE]>,
}

impl TaggedMessage for EphemeralPublicKeyMessage {
    const TAG: &'static str = "tessera/ephemeral-public-key";
}

impl EphemeralPublicKeyMessage {
    /// Decoded key the sender generated for `receiver`
    pub fn public_key_for(&self, receiver: MemberIndex) -> Option<PublicKey> {
        self.ephemeral_public_keys
            .get(&receiver)
            .and_then(|bytes| PublicKey::from_bytes(bytes).ok())
    }

    /// Whether the message carries a valid key for every one of `members`
    /// other than the sender. Anyone can check this, so a failure is public
    /// evidence against the sender.
    pub fn covers(&self, members: &[MemberIndex]) -> bool {
        members
            .iter()
            .filter(|member| **member != self.sender)
            .all(|member| self.public_key_for(*member).is_some())
    }
}

/// Ephemeral key pairs and derived symmetric keys of one member
pub struct PairwiseKeys {
    member: MemberIndex,
    ephemeral_key_pairs: BTreeMap<MemberIndex, KeyPair>,
    symmetric_keys: BTreeMap<MemberIndex, SymmetricKey>,
}

impl PairwiseKeys {
    /// Generate one key pair per peer and the message announcing them
    pub fn generate<R: RngCore + CryptoRng>(
        member: MemberIndex,
        session_id: &str,
        peers: &[MemberIndex],
        rng: &mut R,
    ) -> (Self, EphemeralPublicKeyMessage) {
        let ephemeral_key_pairs: BTreeMap<MemberIndex, KeyPair> = peers
            .iter()
            .filter(|peer| **peer != member)
            .map(|peer| (*peer, KeyPair::generate(rng)))
            .collect();

        let message = EphemeralPublicKeyMessage {
            sender: member,
            session_id: session_id.to_string(),
            ephemeral_public_keys: ephemeral_key_pairs
                .iter()
                .map(|(peer, pair)| (*peer, pair.public_key.to_bytes()))
                .collect(),
        };

        debug!(member = %member, peers = ephemeral_key_pairs.len(), "Generated ephemeral key pairs");

        let keys = Self {
            member,
            ephemeral_key_pairs,
            symmetric_keys: BTreeMap::new(),
        };
        (keys, message)
    }

    /// Owning member
    pub fn member(&self) -> MemberIndex {
        self.member
    }

    /// Key pairs by peer
    pub fn ephemeral_key_pairs(&self) -> &BTreeMap<MemberIndex, KeyPair> {
        &self.ephemeral_key_pairs
    }

    /// Key pair generated for `peer`
    pub fn ephemeral_key_pair(&self, peer: MemberIndex) -> Option<&KeyPair> {
        self.ephemeral_key_pairs.get(&peer)
    }

    /// Derived symmetric keys by peer
    pub fn symmetric_keys(&self) -> &BTreeMap<MemberIndex, SymmetricKey> {
        &self.symmetric_keys
    }

    /// Symmetric key shared with `peer`.
    ///
    /// A missing key means a round needing it started before derivation
    /// finished, which is a sequencing fault.
    pub fn symmetric_key(&self, peer: MemberIndex) -> Result<&SymmetricKey> {
        self.symmetric_keys
            .get(&peer)
            .ok_or(ProtocolError::MissingSymmetricKey {
                member: self.member,
                peer,
            })
    }

    /// Derive a symmetric key with every operating sender in `messages`.
    ///
    /// A message without a valid key for this member disqualifies its
    /// sender. Every message is still processed; the error for the first
    /// offending sender is returned afterwards so the caller can report it.
    pub fn generate_symmetric_keys(
        &mut self,
        group: &mut Group,
        messages: &[EphemeralPublicKeyMessage],
    ) -> Result<()> {
        let mut first_error = None;

        for message in messages {
            let sender = message.sender;
            if sender == self.member || !group.is_operating(sender) {
                continue;
            }
            let Some(key_pair) = self.ephemeral_key_pairs.get(&sender) else {
                debug!(member = %self.member, sender = %sender, "No key pair for sender");
                continue;
            };

            match message.public_key_for(self.member) {
                Some(public_key) => {
                    let symmetric_key = key_pair.private_key.ecdh(&public_key)?;
                    self.symmetric_keys.insert(sender, symmetric_key);
                }
                None => {
                    warn!(
                        member = %self.member,
                        sender = %sender,
                        "Ephemeral public key message has no valid key for this member"
                    );
                    group.disqualify(sender);
                    if first_error.is_none() {
                        first_error =
                            Some(ProtocolError::InvalidEphemeralPublicKeyMessage { sender });
                    }
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// Disqualify senders whose message does not cover every member they were
/// expected to address. Returns the newly disqualified senders.
pub fn disqualify_incomplete_senders(
    group: &mut Group,
    expected: &[MemberIndex],
    messages: &[EphemeralPublicKeyMessage],
) -> Vec<MemberIndex> {
    let mut disqualified = Vec::new();
    for message in messages {
        if group.is_operating(message.sender) && !message.covers(expected) {
            group.disqualify(message.sender);
            disqualified.push(message.sender);
        }
    }
    disqualified
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    const SESSION: &str = "session-1";

    fn idx(i: u16) -> MemberIndex {
        MemberIndex::new(i)
    }

    fn generate_all(group: &Group) -> (Vec<PairwiseKeys>, Vec<EphemeralPublicKeyMessage>) {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        group
            .member_indices()
            .iter()
            .map(|id| PairwiseKeys::generate(*id, SESSION, group.member_indices(), &mut rng))
            .unzip()
    }

    #[test]
    fn test_generate_ephemeral_key_pairs() {
        let group = Group::new(0, 3).unwrap();
        let (members, messages) = generate_all(&group);

        for (keys, message) in members.iter().zip(&messages) {
            assert_eq!(keys.ephemeral_key_pairs().len(), 2);
            assert!(keys.ephemeral_key_pair(keys.member()).is_none());

            assert_eq!(message.sender, keys.member());
            assert_eq!(message.session_id, SESSION);
            assert_eq!(message.ephemeral_public_keys.len(), 2);
            assert!(!message.ephemeral_public_keys.contains_key(&keys.member()));
        }
    }

    #[test]
    fn test_generate_symmetric_keys() {
        let mut group = Group::new(0, 3).unwrap();
        let (mut members, messages) = generate_all(&group);

        for keys in &mut members {
            keys.generate_symmetric_keys(&mut group, &messages).unwrap();
            assert_eq!(keys.symmetric_keys().len(), 2);
            assert!(!keys.symmetric_keys().contains_key(&keys.member()));
        }

        for a in &members {
            for b in &members {
                if a.member() != b.member() {
                    assert_eq!(
                        a.symmetric_key(b.member()).unwrap(),
                        b.symmetric_key(a.member()).unwrap()
                    );
                }
            }
        }
    }

    #[test]
    fn test_invalid_ephemeral_message_only_affects_intended_peer() {
        let group = Group::new(0, 3).unwrap();
        let (mut members, mut messages) = generate_all(&group);

        // Member 2 omits the key meant for member 3.
        messages[1].ephemeral_public_keys.remove(&idx(3));

        for keys in &mut members {
            let mut view = group.clone();
            let result = keys.generate_symmetric_keys(&mut view, &messages);

            if keys.member() == idx(3) {
                let error = result.unwrap_err();
                assert_eq!(
                    error.to_string(),
                    "Member [2] sent invalid ephemeral public key message"
                );
                assert_matches!(
                    error,
                    ProtocolError::InvalidEphemeralPublicKeyMessage { sender } if sender == idx(2)
                );
                assert!(view.is_disqualified(idx(2)));
                assert_eq!(keys.symmetric_keys().len(), 1);
            } else {
                result.unwrap();
                assert_eq!(keys.symmetric_keys().len(), 2);
            }
        }
    }

    #[test]
    fn test_incomplete_messages_are_public_evidence() {
        let mut group = Group::new(0, 3).unwrap();
        let (_, mut messages) = generate_all(&group);
        messages[1].ephemeral_public_keys.remove(&idx(3));

        let expected = group.member_indices().to_vec();
        let disqualified = disqualify_incomplete_senders(&mut group, &expected, &messages);

        assert_eq!(disqualified, vec![idx(2)]);
        assert_eq!(group.operating_members(), vec![idx(1), idx(3)]);
    }

    #[test]
    fn test_missing_symmetric_key_is_a_sequencing_fault() {
        let group = Group::new(0, 2).unwrap();
        let (members, _) = generate_all(&group);

        let error = members[0].symmetric_key(idx(2)).unwrap_err();
        assert!(error
            .to_string()
            .contains("cannot get symmetric key with member"));
    }
}
