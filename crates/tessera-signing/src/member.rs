//! Member-side signing logic: ephemeral key bootstrap and packaging of
//! capability round payloads

use crate::capability::{RoundInput, RoundOutput};
use crate::messages::SigningRoundMessage;
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use tessera_core::{Group, MemberIndex, ProtocolError, Result};
use tessera_protocol::{disqualify_incomplete_senders, EphemeralPublicKeyMessage, PairwiseKeys};
use tracing::{debug, warn};

/// Member taking part in a signing session
pub struct SigningMember {
    id: MemberIndex,
    group: Group,
    session_id: String,
    keys: PairwiseKeys,
    roster: Vec<MemberIndex>,
}

impl SigningMember {
    /// Member `id` of `group`, with fresh ephemeral keys for every other
    /// group member and the message announcing them
    pub fn new<R: RngCore + CryptoRng>(
        id: MemberIndex,
        group: Group,
        session_id: impl Into<String>,
        rng: &mut R,
    ) -> Result<(Self, EphemeralPublicKeyMessage)> {
        if !group.is_operating(id) {
            return Err(ProtocolError::invalid_group(format!(
                "member [{id}] is not an operating member of the signing group"
            )));
        }
        let session_id = session_id.into();
        let roster = group.member_indices().to_vec();
        let (keys, message) = PairwiseKeys::generate(id, &session_id, &roster, rng);

        let member = Self {
            id,
            group,
            session_id,
            keys,
            roster,
        };
        Ok((member, message))
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

    /// Pairwise keys of this member
    pub fn keys(&self) -> &PairwiseKeys {
        &self.keys
    }

    /// Derive a symmetric key with every operating peer. Same rules as in
    /// key generation: a message without a key for this member is reported,
    /// an incomplete one disqualifies its sender everywhere.
    pub fn generate_symmetric_keys(&mut self, messages: &[EphemeralPublicKeyMessage]) -> Result<()> {
        let derived = self.keys.generate_symmetric_keys(&mut self.group, messages);
        for sender in disqualify_incomplete_senders(&mut self.group, &self.roster, messages) {
            warn!(member = %self.id, sender = %sender, "Disqualified sender of incomplete ephemeral keys");
        }
        derived
    }

    /// Fail with `MissingSymmetricKey` unless a key exists for every
    /// operating peer
    pub fn ensure_symmetric_keys(&self) -> Result<()> {
        for peer in self.group.operating_peers(self.id) {
            self.keys.symmetric_key(peer)?;
        }
        Ok(())
    }

    /// Wrap a capability's round output into a broadcast message, encrypting
    /// each peer payload under the pair's symmetric key.
    ///
    /// The output must carry a non-empty broadcast payload and exactly one
    /// payload per operating peer.
    pub fn package_round(&self, round: u8, output: RoundOutput) -> Result<SigningRoundMessage> {
        let phase = format!("signing round {round}");
        if output.broadcast.is_empty() {
            return Err(ProtocolError::outgoing_message(phase, "empty broadcast payload"));
        }

        let peers = self.group.operating_peers(self.id);
        if output.peer_payloads.len() != peers.len() {
            return Err(ProtocolError::outgoing_message(
                phase,
                format!(
                    "{} peer payloads for {} operating peers",
                    output.peer_payloads.len(),
                    peers.len()
                ),
            ));
        }

        let mut peer_payloads = BTreeMap::new();
        for peer in peers {
            let key = self.keys.symmetric_key(peer)?;
            let payload = output.peer_payloads.get(&peer).ok_or_else(|| {
                ProtocolError::outgoing_message(
                    format!("signing round {round}"),
                    format!("no payload for member [{peer}]"),
                )
            })?;
            peer_payloads.insert(peer, key.encrypt(payload)?);
        }

        debug!(member = %self.id, round, peers = peer_payloads.len(), "Packaged signing round");
        Ok(SigningRoundMessage {
            sender: self.id,
            session_id: self.session_id.clone(),
            round,
            broadcast_payload: output.broadcast,
            peer_payloads,
        })
    }

    /// Decrypt the payload a peer addressed to this member
    pub fn open_round_message(&self, message: SigningRoundMessage) -> Result<RoundInput> {
        let sender = message.sender;
        let key = self.keys.symmetric_key(sender)?;

        let ciphertext = message
            .peer_payloads
            .get(&self.id)
            .ok_or_else(|| ProtocolError::invalid_message(sender, "no payload for this member"))?;
        let peer_payload = key
            .decrypt(ciphertext)
            .map_err(|e| ProtocolError::invalid_message(sender, e.to_string()))?;

        Ok(RoundInput {
            sender,
            broadcast: message.broadcast_payload,
            peer_payload,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn idx(i: u16) -> MemberIndex {
        MemberIndex::new(i)
    }

    fn members(group_size: usize, derive: bool) -> Vec<SigningMember> {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let group = Group::new(1, group_size).unwrap();
        let (mut members, messages): (Vec<_>, Vec<_>) = group
            .member_indices()
            .iter()
            .map(|id| SigningMember::new(*id, group.clone(), "sign-1", &mut rng).unwrap())
            .unzip();
        if derive {
            for member in &mut members {
                member.generate_symmetric_keys(&messages).unwrap();
            }
        }
        members
    }

    fn output_for(member: &SigningMember) -> RoundOutput {
        RoundOutput {
            broadcast: vec![member.id().value() as u8],
            peer_payloads: member
                .group()
                .operating_peers(member.id())
                .into_iter()
                .map(|peer| (peer, format!("{} to {}", member.id(), peer).into_bytes()))
                .collect(),
        }
    }

    #[test]
    fn test_round_message_has_one_payload_per_peer() {
        let members = members(4, true);
        let message = members[0].package_round(2, output_for(&members[0])).unwrap();

        assert!(!message.broadcast_payload.is_empty());
        assert_eq!(message.peer_payloads.len(), 3);
        assert!(!message.peer_payloads.contains_key(&idx(1)));
    }

    #[test]
    fn test_peer_payload_opens_only_for_its_receiver() {
        let members = members(3, true);
        let message = members[0].package_round(2, output_for(&members[0])).unwrap();

        let input = members[1].open_round_message(message.clone()).unwrap();
        assert_eq!(input.sender, idx(1));
        assert_eq!(input.peer_payload, b"1 to 2".to_vec());

        // Member 3's key with member 1 cannot open member 2's payload.
        let key = members[2].keys().symmetric_key(idx(1)).unwrap();
        assert!(key.decrypt(&message.peer_payloads[&idx(2)]).is_err());
    }

    #[test]
    fn test_missing_symmetric_key_is_fatal() {
        let members = members(3, false);
        let error = members[0].ensure_symmetric_keys().unwrap_err();
        assert_matches!(
            error,
            ProtocolError::MissingSymmetricKey { member, peer } if member == idx(1) && peer == idx(2)
        );
    }

    #[test]
    fn test_empty_broadcast_is_rejected() {
        let members = members(3, true);
        let mut output = output_for(&members[0]);
        output.broadcast.clear();

        assert_matches!(
            members[0].package_round(2, output),
            Err(ProtocolError::OutgoingMessage { .. })
        );
    }

    #[test]
    fn test_missing_peer_payload_is_rejected() {
        let members = members(3, true);
        let mut output = output_for(&members[0]);
        output.peer_payloads.remove(&idx(3));

        assert_matches!(
            members[0].package_round(2, output),
            Err(ProtocolError::OutgoingMessage { .. })
        );
    }
}
