//! Accusation evidence
//!
//! Evidence is the ephemeral private key one member generated for another.
//! With it, anyone can re-derive the pair's symmetric key from the public
//! ephemeral key messages, decrypt what was broadcast between the two and
//! check it independently. Both accusation rounds and the reconstruction
//! round go through here.

use std::collections::BTreeMap;
use tessera_core::MemberIndex;
use tessera_crypto::{PrivateKey, SymmetricKey, SCALAR_SIZE};
use tessera_protocol::EphemeralPublicKeyMessage;

/// What a revealed ephemeral private key proves
pub(crate) enum RevealedKey {
    /// The key matches what its owner published; the pair's symmetric key
    Valid(SymmetricKey),
    /// The key does not match what its owner published
    Forged,
    /// The counterpart never published a usable key for the owner
    CounterpartMissing,
}

/// Check a private key `owner` claims to have generated for `counterpart`
/// and re-derive their symmetric key.
pub(crate) fn recover_symmetric_key(
    ephemeral_messages: &BTreeMap<MemberIndex, EphemeralPublicKeyMessage>,
    owner: MemberIndex,
    counterpart: MemberIndex,
    revealed: &[u8; SCALAR_SIZE],
) -> RevealedKey {
    let Ok(private_key) = PrivateKey::from_bytes(revealed) else {
        return RevealedKey::Forged;
    };

    let published = ephemeral_messages
        .get(&owner)
        .and_then(|message| message.public_key_for(counterpart));
    if published != Some(private_key.public_key()) {
        return RevealedKey::Forged;
    }

    let Some(counterpart_key) = ephemeral_messages
        .get(&counterpart)
        .and_then(|message| message.public_key_for(owner))
    else {
        return RevealedKey::CounterpartMissing;
    };

    match private_key.ecdh(&counterpart_key) {
        Ok(symmetric_key) => RevealedKey::Valid(symmetric_key),
        Err(_) => RevealedKey::CounterpartMissing,
    }
}

/// Decide an accusation, returning the member to disqualify.
///
/// Self-accusations and forged evidence convict the accuser. Otherwise
/// `accused_misbehaved` re-checks the disputed data under the recovered
/// symmetric key: the accused is convicted if it fails, the accuser if it
/// holds up.
pub(crate) fn resolve_accusation<F>(
    ephemeral_messages: &BTreeMap<MemberIndex, EphemeralPublicKeyMessage>,
    accuser: MemberIndex,
    accused: MemberIndex,
    revealed: &[u8; SCALAR_SIZE],
    accused_misbehaved: F,
) -> MemberIndex
where
    F: FnOnce(&SymmetricKey) -> bool,
{
    if accuser == accused {
        return accuser;
    }

    match recover_symmetric_key(ephemeral_messages, accuser, accused, revealed) {
        RevealedKey::Forged => accuser,
        RevealedKey::CounterpartMissing => accused,
        RevealedKey::Valid(symmetric_key) => {
            if accused_misbehaved(&symmetric_key) {
                accused
            } else {
                accuser
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use tessera_protocol::PairwiseKeys;

    fn idx(i: u16) -> MemberIndex {
        MemberIndex::new(i)
    }

    fn setup() -> (Vec<PairwiseKeys>, BTreeMap<MemberIndex, EphemeralPublicKeyMessage>) {
        let mut rng = ChaCha20Rng::seed_from_u64(99);
        let members = [idx(1), idx(2), idx(3)];
        members
            .iter()
            .map(|id| {
                let (keys, message) = PairwiseKeys::generate(*id, "s", &members, &mut rng);
                (keys, (*id, message))
            })
            .unzip()
    }

    fn revealed(keys: &PairwiseKeys, peer: MemberIndex) -> [u8; 32] {
        keys.ephemeral_key_pair(peer).unwrap().private_key.to_bytes()
    }

    #[test]
    fn test_valid_evidence_defers_to_the_check() {
        let (keys, messages) = setup();
        let evidence = revealed(&keys[0], idx(2));

        assert_eq!(
            resolve_accusation(&messages, idx(1), idx(2), &evidence, |_| true),
            idx(2)
        );
        assert_eq!(
            resolve_accusation(&messages, idx(1), idx(2), &evidence, |_| false),
            idx(1)
        );
    }

    #[test]
    fn test_recovered_key_matches_the_pair_key() {
        let (keys, messages) = setup();
        let evidence = revealed(&keys[0], idx(3));

        let mut accused_keys = keys.into_iter().nth(2).unwrap();
        let mut group = tessera_core::Group::new(0, 3).unwrap();
        let all: Vec<_> = messages.values().cloned().collect();
        accused_keys.generate_symmetric_keys(&mut group, &all).unwrap();

        match recover_symmetric_key(&messages, idx(1), idx(3), &evidence) {
            RevealedKey::Valid(key) => assert_eq!(&key, accused_keys.symmetric_key(idx(1)).unwrap()),
            _ => panic!("evidence should be valid"),
        }
    }

    #[test]
    fn test_forged_evidence_convicts_the_accuser() {
        let (keys, messages) = setup();
        // Key member 1 generated for member 3, presented against member 2.
        let evidence = revealed(&keys[0], idx(3));

        assert_eq!(
            resolve_accusation(&messages, idx(1), idx(2), &evidence, |_| true),
            idx(1)
        );
        assert_eq!(
            resolve_accusation(&messages, idx(1), idx(2), &[0xff; 32], |_| true),
            idx(1)
        );
    }

    #[test]
    fn test_self_accusation_convicts_the_accuser() {
        let (keys, messages) = setup();
        let evidence = revealed(&keys[0], idx(2));

        assert_eq!(
            resolve_accusation(&messages, idx(1), idx(1), &evidence, |_| true),
            idx(1)
        );
    }
}
