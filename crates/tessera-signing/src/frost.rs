//! FROST-Ed25519 signing capability
//!
//! Round one broadcasts nonce commitments, round two broadcasts signature
//! shares, and finalization aggregates them into a standard Ed25519
//! signature checked against the group key before it is returned. A share
//! that fails verification during aggregation names its sender, so the
//! driver can exclude it and retry.
//!
//! Every per-peer payload is a digest binding the sender's broadcast
//! payload to the pair. A receiver recomputes it from the broadcast it saw,
//! so a sender showing different broadcasts to different members is caught.

use crate::capability::{RoundInput, RoundOutput, SigningCapability};
use async_trait::async_trait;
use frost_ed25519 as frost;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tessera_core::{MemberIndex, ProtocolError, Result};
use tessera_crypto::{verify_signature, PrivateKeyShare, SIGNATURE_SIZE};
use tracing::debug;

const BINDING_DOMAIN: &[u8] = b"tessera/signing/binding";

/// Nonce commitments
const COMMITMENT_ROUND: u8 = 0;
/// Signature shares
const SHARE_ROUND: u8 = 1;

fn frost_error(context: &str, error: frost::Error) -> ProtocolError {
    ProtocolError::capability(format!("{context}: {error}"))
}

fn identifier(member: MemberIndex) -> Result<frost::Identifier> {
    frost::Identifier::try_from(member.value())
        .map_err(|e| frost_error(&format!("no identifier for member [{member}]"), e))
}

/// Digest binding `broadcast` to the `sender` → `receiver` pair in `round`
pub fn binding_digest(round: u8, sender: MemberIndex, receiver: MemberIndex, broadcast: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(BINDING_DOMAIN);
    hasher.update([round]);
    hasher.update(sender.value().to_be_bytes());
    hasher.update(receiver.value().to_be_bytes());
    hasher.update(broadcast);
    hasher.finalize().to_vec()
}

/// FROST signer for one member and one message
pub struct FrostCapability {
    member: MemberIndex,
    identifier: frost::Identifier,
    key_package: frost::keys::KeyPackage,
    public_key_package: frost::keys::PublicKeyPackage,
    group_public_key: [u8; 32],
    message: Vec<u8>,
    nonces: Option<frost::round1::SigningNonces>,
    commitments: BTreeMap<frost::Identifier, frost::round1::SigningCommitments>,
    signing_package: Option<frost::SigningPackage>,
    signature_shares: BTreeMap<frost::Identifier, frost::round2::SignatureShare>,
    /// Members of the signing package, keyed by FROST identifier
    signers: BTreeMap<frost::Identifier, MemberIndex>,
    expected: BTreeMap<u8, BTreeSet<MemberIndex>>,
    received: BTreeMap<u8, BTreeSet<MemberIndex>>,
}

impl FrostCapability {
    /// Signer for `message` holding `share`
    pub fn new(share: &PrivateKeyShare, message: impl Into<Vec<u8>>) -> Result<Self> {
        let member = share.member();
        let own_identifier = identifier(member)?;

        let signing_share = frost::keys::SigningShare::deserialize(share.secret_share_bytes())
            .map_err(|e| frost_error("invalid signing share", e))?;
        let verifying_key = frost::VerifyingKey::deserialize(share.group_public_key())
            .map_err(|e| frost_error("invalid group public key", e))?;

        let mut verifying_shares = BTreeMap::new();
        for (holder, bytes) in share.verifying_shares() {
            let verifying_share = frost::keys::VerifyingShare::deserialize(*bytes)
                .map_err(|e| frost_error(&format!("invalid verifying share of member [{holder}]"), e))?;
            verifying_shares.insert(identifier(*holder)?, verifying_share);
        }
        let own_verifying_share = *verifying_shares.get(&own_identifier).ok_or_else(|| {
            ProtocolError::capability(format!("no verifying share for member [{member}]"))
        })?;

        let min_signers = u16::try_from(share.min_signers())
            .map_err(|_| ProtocolError::capability("signer threshold exceeds the identifier range"))?;

        let key_package = frost::keys::KeyPackage::new(
            own_identifier,
            signing_share,
            own_verifying_share,
            verifying_key,
            min_signers,
        );
        let public_key_package = frost::keys::PublicKeyPackage::new(verifying_shares, verifying_key);

        Ok(Self {
            member,
            identifier: own_identifier,
            key_package,
            public_key_package,
            group_public_key: share.group_public_key(),
            message: message.into(),
            nonces: None,
            commitments: BTreeMap::new(),
            signing_package: None,
            signature_shares: BTreeMap::new(),
            signers: BTreeMap::new(),
            expected: BTreeMap::new(),
            received: BTreeMap::new(),
        })
    }

    fn round_output(&self, round: u8, peers: &[MemberIndex], broadcast: Vec<u8>) -> RoundOutput {
        let peer_payloads = peers
            .iter()
            .map(|peer| (*peer, binding_digest(round, self.member, *peer, &broadcast)))
            .collect();
        RoundOutput {
            broadcast,
            peer_payloads,
        }
    }

    fn commit(&mut self, peers: &[MemberIndex]) -> Result<RoundOutput> {
        let (nonces, commitments) =
            frost::round1::commit(self.key_package.signing_share(), &mut OsRng);
        let broadcast = commitments
            .serialize()
            .map_err(|e| frost_error("cannot encode commitments", e))?;

        self.nonces = Some(nonces);
        self.commitments.insert(self.identifier, commitments);
        Ok(self.round_output(COMMITMENT_ROUND, peers, broadcast))
    }

    fn sign(&mut self, peers: &[MemberIndex]) -> Result<RoundOutput> {
        let mut signers = BTreeMap::new();
        for member in peers.iter().copied().chain(std::iter::once(self.member)) {
            let id = identifier(member)?;
            let commitments = self.commitments.get(&id).ok_or_else(|| {
                ProtocolError::capability(format!("no commitments from member [{member}]"))
            })?;
            signers.insert(id, *commitments);
            self.signers.insert(id, member);
        }

        let nonces = self
            .nonces
            .take()
            .ok_or_else(|| ProtocolError::capability("signature share requested before commitments"))?;
        let signing_package = frost::SigningPackage::new(signers, &self.message);
        let share = frost::round2::sign(&signing_package, &nonces, &self.key_package)
            .map_err(|e| frost_error("cannot produce signature share", e))?;

        let broadcast = share.serialize().to_vec();
        self.signature_shares.insert(self.identifier, share);
        self.signing_package = Some(signing_package);
        Ok(self.round_output(SHARE_ROUND, peers, broadcast))
    }

    /// Map an aggregation failure to the member responsible for it
    fn blame(&self, error: frost::Error) -> ProtocolError {
        if let frost::Error::InvalidSignatureShare { culprit } = error {
            if let Some(member) = self.signers.get(&culprit) {
                return ProtocolError::invalid_message(*member, "signature share does not verify");
            }
        }
        frost_error("cannot aggregate signature shares", error)
    }
}

#[async_trait]
impl SigningCapability for FrostCapability {
    fn rounds(&self) -> u8 {
        2
    }

    async fn start_round(&mut self, round: u8, peers: &[MemberIndex]) -> Result<RoundOutput> {
        self.expected.insert(round, peers.iter().copied().collect());
        match round {
            COMMITMENT_ROUND => self.commit(peers),
            SHARE_ROUND => self.sign(peers),
            other => Err(ProtocolError::capability(format!("no signing round {other}"))),
        }
    }

    fn absorb(&mut self, round: u8, input: RoundInput) -> Result<()> {
        let sender = input.sender;
        let expected = binding_digest(round, sender, self.member, &input.broadcast);
        if input.peer_payload != expected {
            return Err(ProtocolError::invalid_message(
                sender,
                "broadcast payload does not match its binding digest",
            ));
        }
        let id = identifier(sender)?;

        match round {
            COMMITMENT_ROUND => {
                let commitments = frost::round1::SigningCommitments::deserialize(&input.broadcast)
                    .map_err(|e| ProtocolError::invalid_message(sender, e.to_string()))?;
                self.commitments.insert(id, commitments);
            }
            SHARE_ROUND => {
                let bytes: [u8; 32] = input.broadcast.as_slice().try_into().map_err(|_| {
                    ProtocolError::invalid_message(sender, "signature share is not 32 bytes")
                })?;
                let share = frost::round2::SignatureShare::deserialize(bytes)
                    .map_err(|e| ProtocolError::invalid_message(sender, e.to_string()))?;
                self.signature_shares.insert(id, share);
            }
            other => {
                return Err(ProtocolError::invalid_message(
                    sender,
                    format!("no signing round {other}"),
                ))
            }
        }

        debug!(member = %self.member, sender = %sender, round, "Absorbed signing contribution");
        self.received.entry(round).or_default().insert(sender);
        Ok(())
    }

    fn is_round_complete(&self, round: u8) -> bool {
        let Some(expected) = self.expected.get(&round) else {
            return false;
        };
        let received = self.received.get(&round);
        expected
            .iter()
            .all(|peer| received.is_some_and(|received| received.contains(peer)))
    }

    fn finalize(&mut self) -> Result<[u8; SIGNATURE_SIZE]> {
        let signing_package = self
            .signing_package
            .as_ref()
            .ok_or_else(|| ProtocolError::capability("finalization before signature shares"))?;

        if let Some(absent) = self
            .signers
            .iter()
            .find(|(id, _)| !self.signature_shares.contains_key(id))
            .map(|(_, member)| *member)
        {
            return Err(ProtocolError::invalid_message(absent, "no signature share received"));
        }

        let signature = frost::aggregate(
            signing_package,
            &self.signature_shares,
            &self.public_key_package,
        )
        .map_err(|e| self.blame(e))?;

        let bytes = signature.serialize();
        verify_signature(&self.message, &bytes, &self.group_public_key)?;
        Ok(bytes)
    }

    fn restart(&mut self) -> Result<()> {
        debug!(member = %self.member, "Restarting FROST rounds");
        self.nonces = None;
        self.commitments.clear();
        self.signing_package = None;
        self.signature_shares.clear();
        self.signers.clear();
        self.expected.clear();
        self.received.clear();
        Ok(())
    }
}

impl fmt::Debug for FrostCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrostCapability")
            .field("member", &self.member)
            .field("commitments", &self.commitments.len())
            .field("signature_shares", &self.signature_shares.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::dealer_shares;
    use assert_matches::assert_matches;

    const MESSAGE: &[u8] = b"transfer 10 to alice";

    fn idx(i: u16) -> MemberIndex {
        MemberIndex::new(i)
    }

    /// Run both rounds among `capabilities` without a network
    async fn run(capabilities: &mut [FrostCapability]) {
        run_with(capabilities, |_, _, _| {}).await;
    }

    /// Same as [`run`], letting `tamper` edit each round output before it
    /// is delivered
    async fn run_with(
        capabilities: &mut [FrostCapability],
        tamper: impl Fn(u8, MemberIndex, &mut RoundOutput),
    ) {
        let members: Vec<MemberIndex> = capabilities.iter().map(|c| c.member).collect();
        for round in 0..2u8 {
            let mut outputs = Vec::new();
            for capability in capabilities.iter_mut() {
                let peers: Vec<_> = members.iter().copied().filter(|m| *m != capability.member).collect();
                let mut output = capability.start_round(round, &peers).await.unwrap();
                tamper(round, capability.member, &mut output);
                outputs.push((capability.member, output));
            }
            for capability in capabilities.iter_mut() {
                for (sender, output) in &outputs {
                    if *sender == capability.member {
                        continue;
                    }
                    capability
                        .absorb(
                            round,
                            RoundInput {
                                sender: *sender,
                                broadcast: output.broadcast.clone(),
                                peer_payload: output.peer_payloads[&capability.member].clone(),
                            },
                        )
                        .unwrap();
                }
                assert!(capability.is_round_complete(round));
            }
        }
    }

    #[tokio::test]
    async fn test_threshold_signers_produce_valid_signature() {
        let shares = dealer_shares(1, 3, 21);
        let mut capabilities: Vec<_> = shares[..2]
            .iter()
            .map(|share| FrostCapability::new(share, MESSAGE).unwrap())
            .collect();

        run(&mut capabilities).await;

        let group_key = shares[0].group_public_key();
        for capability in &mut capabilities {
            let signature = capability.finalize().unwrap();
            verify_signature(MESSAGE, &signature, &group_key).unwrap();
        }
    }

    #[tokio::test]
    async fn test_equivocated_broadcast_is_rejected() {
        let shares = dealer_shares(1, 3, 22);
        let mut first = FrostCapability::new(&shares[0], MESSAGE).unwrap();
        let mut second = FrostCapability::new(&shares[1], MESSAGE).unwrap();

        let output = first.start_round(0, &[idx(2)]).await.unwrap();
        second.start_round(0, &[idx(1)]).await.unwrap();

        // The broadcast member 2 saw differs from the one member 1 bound.
        let mut tampered = output.broadcast.clone();
        tampered[0] ^= 1;
        let error = second
            .absorb(
                0,
                RoundInput {
                    sender: idx(1),
                    broadcast: tampered,
                    peer_payload: output.peer_payloads[&idx(2)].clone(),
                },
            )
            .unwrap_err();

        assert_matches!(error, ProtocolError::InvalidMessage { sender, .. } if sender == idx(1));
        assert!(!second.is_round_complete(0));
    }

    #[tokio::test]
    async fn test_invalid_share_names_its_sender_and_signing_restarts() {
        let shares = dealer_shares(1, 3, 24);
        let mut capabilities: Vec<_> = shares
            .iter()
            .map(|share| FrostCapability::new(share, MESSAGE).unwrap())
            .collect();

        // Member 3 broadcasts a corrupted share with matching binding digests.
        run_with(&mut capabilities, |round, sender, output| {
            if round == SHARE_ROUND && sender == idx(3) {
                output.broadcast[0] ^= 1;
                for (receiver, payload) in output.peer_payloads.iter_mut() {
                    *payload = binding_digest(round, sender, *receiver, &output.broadcast);
                }
            }
        })
        .await;

        for capability in &mut capabilities[..2] {
            assert_matches!(
                capability.finalize(),
                Err(ProtocolError::InvalidMessage { sender, .. }) if sender == idx(3)
            );
            capability.restart().unwrap();
        }

        run(&mut capabilities[..2]).await;
        let group_key = shares[0].group_public_key();
        for capability in &mut capabilities[..2] {
            let signature = capability.finalize().unwrap();
            verify_signature(MESSAGE, &signature, &group_key).unwrap();
        }
    }

    #[tokio::test]
    async fn test_missing_share_names_the_silent_signer() {
        let shares = dealer_shares(1, 3, 25);
        let mut first = FrostCapability::new(&shares[0], MESSAGE).unwrap();
        let mut second = FrostCapability::new(&shares[1], MESSAGE).unwrap();

        let commitments = second.start_round(COMMITMENT_ROUND, &[idx(1)]).await.unwrap();
        let output = first.start_round(COMMITMENT_ROUND, &[idx(2)]).await.unwrap();
        second
            .absorb(
                COMMITMENT_ROUND,
                RoundInput {
                    sender: idx(1),
                    broadcast: output.broadcast.clone(),
                    peer_payload: output.peer_payloads[&idx(2)].clone(),
                },
            )
            .unwrap();
        first
            .absorb(
                COMMITMENT_ROUND,
                RoundInput {
                    sender: idx(2),
                    broadcast: commitments.broadcast.clone(),
                    peer_payload: commitments.peer_payloads[&idx(1)].clone(),
                },
            )
            .unwrap();

        // Member 2 never delivers its signature share.
        first.start_round(SHARE_ROUND, &[idx(2)]).await.unwrap();
        assert!(!first.is_round_complete(SHARE_ROUND));
        assert_matches!(
            first.finalize(),
            Err(ProtocolError::InvalidMessage { sender, .. }) if sender == idx(2)
        );
    }

    #[tokio::test]
    async fn test_share_round_needs_commitments_from_every_peer() {
        let shares = dealer_shares(1, 3, 23);
        let mut capability = FrostCapability::new(&shares[0], MESSAGE).unwrap();
        capability.start_round(0, &[idx(2)]).await.unwrap();

        assert_matches!(
            capability.start_round(1, &[idx(2)]).await,
            Err(ProtocolError::Capability { .. })
        );
    }
}
