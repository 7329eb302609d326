//! # Tessera Signing
//!
//! Threshold signing with key shares produced by key generation. Members
//! bootstrap pairwise symmetric keys, then drive an opaque
//! [`SigningCapability`] round by round: every round each member broadcasts
//! one payload plus one encrypted payload per peer. After the last round the
//! capability aggregates a single Ed25519 signature under the group key.
//!
//! [`execute`] signs with the built-in [`FrostCapability`];
//! [`execute_with_capability`] accepts any other implementation.

#![forbid(unsafe_code)]

/// Signing capability contract
pub mod capability;

/// FROST-Ed25519 capability
pub mod frost;

/// Member-side signing logic
pub mod member;

/// Signing messages
pub mod messages;

/// Session outcome
pub mod result;

/// Executor states
pub mod states;

pub use capability::{RoundInput, RoundOutput, SigningCapability};
pub use frost::FrostCapability;
pub use member::SigningMember;
pub use messages::{registry, SigningMessage};
pub use result::SigningResult;

use rand::rngs::OsRng;
use std::sync::Arc;
use tessera_core::{Group, MemberIndex, ProtocolError, Result};
use tessera_crypto::PrivateKeyShare;
use tessera_protocol::{BlockCounter, BroadcastChannel, Machine, ProtocolConfig, TypedChannel};
use tracing::{info, warn};

/// Build the member's signing machine around an arbitrary capability.
///
/// Only operating members of `group` sign; mark members that must not take
/// part inactive beforehand.
pub fn prepare_with_capability(
    member: MemberIndex,
    group: Group,
    session_id: &str,
    capability: Box<dyn SigningCapability>,
    channel: Arc<dyn BroadcastChannel>,
    block_counter: Arc<dyn BlockCounter>,
    config: &ProtocolConfig,
) -> Result<Machine<SigningMessage, SigningResult>> {
    config.validate()?;
    if session_id.is_empty() {
        return Err(ProtocolError::config("session id must not be empty"));
    }

    let (signer, announcement) = SigningMember::new(member, group, session_id, &mut OsRng)?;
    info!(
        member = %member,
        session = session_id,
        signers = signer.group().operating_members().len(),
        rounds = capability.rounds(),
        "Starting signing"
    );

    Ok(Machine::new(
        TypedChannel::new(channel, registry()),
        block_counter,
        session_id,
        Box::new(states::EphemeralKeyPairGenerationState::new(
            signer,
            announcement,
            capability,
            config.signing.clone(),
        )),
    ))
}

/// Build the signing machine for the holder of `key_share`, signing
/// `message` with FROST.
///
/// Members without a verifying share in `key_share` did not finish key
/// generation and are excluded from the start.
pub fn prepare(
    key_share: &PrivateKeyShare,
    message: &[u8],
    session_id: &str,
    channel: Arc<dyn BroadcastChannel>,
    block_counter: Arc<dyn BlockCounter>,
    config: &ProtocolConfig,
) -> Result<Machine<SigningMessage, SigningResult>> {
    let mut group = Group::new(key_share.dishonest_threshold(), key_share.group_size())?;
    for member in group.member_indices().to_vec() {
        if !key_share.verifying_shares().contains_key(&member) {
            warn!(member = %key_share.member(), excluded = %member, "Member holds no key share");
            group.mark_inactive(member);
        }
    }

    let capability = FrostCapability::new(key_share, message)?;
    prepare_with_capability(
        key_share.member(),
        group,
        session_id,
        Box::new(capability),
        channel,
        block_counter,
        config,
    )
}

/// Sign `message` with `key_share` and return the aggregate signature
pub async fn execute(
    key_share: &PrivateKeyShare,
    message: &[u8],
    session_id: &str,
    channel: Arc<dyn BroadcastChannel>,
    block_counter: Arc<dyn BlockCounter>,
    config: &ProtocolConfig,
) -> Result<SigningResult> {
    prepare(key_share, message, session_id, channel, block_counter, config)?
        .execute()
        .await
}

/// Run a signing session driven by `capability`
pub async fn execute_with_capability(
    member: MemberIndex,
    group: Group,
    session_id: &str,
    capability: Box<dyn SigningCapability>,
    channel: Arc<dyn BroadcastChannel>,
    block_counter: Arc<dyn BlockCounter>,
    config: &ProtocolConfig,
) -> Result<SigningResult> {
    prepare_with_capability(
        member,
        group,
        session_id,
        capability,
        channel,
        block_counter,
        config,
    )?
    .execute()
    .await
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::dealer_shares;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::time::Duration;
    use tessera_crypto::verify_signature;
    use tessera_protocol::{LocalBlockCounter, LocalChannel};

    const MESSAGE: &[u8] = b"release block 42";

    /// Capability whose first round never produces output
    struct StalledCapability;

    #[async_trait]
    impl SigningCapability for StalledCapability {
        fn rounds(&self) -> u8 {
            1
        }

        async fn start_round(&mut self, _round: u8, _peers: &[MemberIndex]) -> Result<RoundOutput> {
            std::future::pending().await
        }

        fn absorb(&mut self, _round: u8, _input: RoundInput) -> Result<()> {
            Ok(())
        }

        fn is_round_complete(&self, _round: u8) -> bool {
            false
        }

        fn finalize(&mut self) -> Result<[u8; 64]> {
            Err(ProtocolError::capability("never finalizes"))
        }
    }

    async fn sign_with(shares: &[PrivateKeyShare]) -> Vec<Result<SigningResult>> {
        let channel = LocalChannel::new("signing-test");
        let counter = LocalBlockCounter::new();
        let config = ProtocolConfig::default();

        let machines: Vec<_> = shares
            .iter()
            .map(|share| {
                prepare(
                    share,
                    MESSAGE,
                    "sign-1",
                    channel.clone(),
                    Arc::new(counter.clone()),
                    &config,
                )
                .unwrap()
            })
            .collect();

        let ticker = counter.spawn_ticker(Duration::from_millis(5));
        let results = join_all(machines.into_iter().map(Machine::execute)).await;
        ticker.abort();
        results
    }

    #[tokio::test]
    async fn test_all_members_sign() {
        let shares = dealer_shares(1, 3, 7);
        let group_key = shares[0].group_public_key();

        for result in sign_with(&shares).await {
            let result = result.unwrap();
            assert_eq!(result.signers.len(), 3);
            verify_signature(MESSAGE, &result.signature, &group_key).unwrap();
        }
    }

    #[tokio::test]
    async fn test_absent_member_does_not_block_signing() {
        let shares = dealer_shares(1, 3, 8);
        let group_key = shares[0].group_public_key();

        for result in sign_with(&shares[..2]).await {
            let result = result.unwrap();
            assert_eq!(result.signers, vec![MemberIndex::new(1), MemberIndex::new(2)]);
            verify_signature(MESSAGE, &result.signature, &group_key).unwrap();
        }
    }

    #[tokio::test]
    async fn test_too_few_signers_lose_quorum() {
        let shares = dealer_shares(1, 4, 9);

        for result in sign_with(&shares[..2]).await {
            let error = result.unwrap_err();
            assert_matches!(
                error.root_cause(),
                ProtocolError::InsufficientQuorum { operating: 2, required: 3, .. }
            );
        }
    }

    #[tokio::test]
    async fn test_stalled_capability_times_out() {
        let channel = LocalChannel::new("signing-test");
        let counter = LocalBlockCounter::new();
        let _ticker = counter.spawn_ticker(Duration::from_millis(5));

        let error = execute_with_capability(
            MemberIndex::new(1),
            Group::new(0, 1).unwrap(),
            "sign-1",
            Box::new(StalledCapability),
            channel,
            Arc::new(counter.clone()),
            &ProtocolConfig::default(),
        )
        .await
        .unwrap_err();

        assert_matches!(&error, ProtocolError::StateFailed { state, .. } if state == "signing_round_1");
        assert!(error.root_cause().is_timeout());
    }

    #[test]
    fn test_rejects_empty_session_id() {
        let shares = dealer_shares(0, 1, 10);
        let result = prepare(
            &shares[0],
            MESSAGE,
            "",
            LocalChannel::new("signing-test"),
            Arc::new(LocalBlockCounter::new()),
            &ProtocolConfig::default(),
        );
        assert_matches!(result, Err(ProtocolError::Config { .. }));
    }
}
