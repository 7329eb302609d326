//! A signer whose signature share is corrupted in transit is dropped by the
//! honest members, who restart the rounds and still produce a signature.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use tessera_core::{Group, MemberIndex};
use tessera_crypto::verify_signature;
use tessera_protocol::{Envelope, TaggedMessage};
use tessera_signing::messages::round::FIRST_SIGNING_ROUND;
use tessera_signing::{registry, SigningMessage};
use tessera_testkit::{expect_all, init_tracing, key_shares, TamperingChannel, TestNetwork};

const CHEATER: u16 = 1;
const MESSAGE: &[u8] = b"epoch 7 checkpoint";

/// Flip one bit of the cheater's broadcast signature share
fn corrupt_signature_share(envelope: Envelope) -> Envelope {
    match registry().decode(&envelope) {
        Ok(SigningMessage::SigningRound(mut message))
            if message.sender == MemberIndex::new(CHEATER) && message.round == FIRST_SIGNING_ROUND + 1 =>
        {
            if let Some(byte) = message.broadcast_payload.first_mut() {
                *byte ^= 1;
            }
            message.encode().unwrap()
        }
        _ => envelope,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_corrupted_signature_share_excludes_its_sender() {
    init_tracing();
    let group = Group::new(1, 4).unwrap();
    let network = TestNetwork::new("malicious-signer");

    let keys = expect_all(network.run_dkg(&group, &[1, 2, 3, 4], "dkg-1").await);
    let group_key = keys[0].group_public_key;

    let channel = TamperingChannel::new(network.channel(), corrupt_signature_share);
    let results = network
        .run_signing_over(channel, &key_shares(&keys), MESSAGE, "sign-1")
        .await;

    // The cheater's own view never sees the corruption; only honest views count.
    let honest = expect_all(results.into_iter().skip(1).collect());
    for result in &honest {
        assert_eq!(
            result.signers,
            vec![MemberIndex::new(2), MemberIndex::new(3), MemberIndex::new(4)]
        );
        verify_signature(MESSAGE, &result.signature, &group_key).unwrap();
    }
}
