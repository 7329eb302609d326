//! # Tessera DKG
//!
//! GJKR distributed key generation over the Ed25519 group. Members join,
//! exchange ephemeral keys, deal Pedersen-committed shares, resolve share
//! accusations to fix the qualified set, publish Feldman points, resolve
//! points accusations, reconstruct the secrets of members whose points
//! failed, and combine everything into a group public key and one private
//! key share each.
//!
//! [`execute`] runs the whole session for one member over a broadcast
//! channel and block counter. The phase logic lives on [`DkgMember`] and
//! can be driven directly.

#![forbid(unsafe_code)]

mod evidence;

/// Member-side phase logic
pub mod member;

/// Key generation messages
pub mod messages;

/// Session outcome
pub mod result;

/// Executor states
pub mod states;

pub use member::{DkgMember, JoiningMember};
pub use messages::{registry, DkgMessage};
pub use result::DkgResult;

use std::sync::Arc;
use tessera_core::{Group, MemberIndex, ProtocolError, Result};
use tessera_protocol::{BlockCounter, BroadcastChannel, Machine, ProtocolConfig, TypedChannel};
use tracing::info;

/// Validate the session inputs and build the member's state machine.
///
/// The machine subscribes to `channel` on construction. Preparing every
/// local member before any of them runs guarantees nobody misses an early
/// join announcement.
pub fn prepare(
    member: MemberIndex,
    group: Group,
    session_id: &str,
    channel: Arc<dyn BroadcastChannel>,
    block_counter: Arc<dyn BlockCounter>,
    config: &ProtocolConfig,
) -> Result<Machine<DkgMessage, DkgResult>> {
    config.validate()?;
    if session_id.is_empty() {
        return Err(ProtocolError::config("session id must not be empty"));
    }

    let joining = JoiningMember::new(member, group, session_id)?;
    info!(
        member = %member,
        session = session_id,
        group_size = joining.group().group_size(),
        dishonest_threshold = joining.group().dishonest_threshold(),
        "Starting key generation"
    );

    Ok(Machine::new(
        TypedChannel::new(channel, registry()),
        block_counter,
        session_id,
        Box::new(states::JoinState::new(joining, config.dkg.clone())),
    ))
}

/// Run a key generation session for `member` and return its result.
///
/// Fails if the configuration is invalid, the member is not part of
/// `group`, or any state fails; the error then names the state.
pub async fn execute(
    member: MemberIndex,
    group: Group,
    session_id: &str,
    channel: Arc<dyn BroadcastChannel>,
    block_counter: Arc<dyn BlockCounter>,
    config: &ProtocolConfig,
) -> Result<DkgResult> {
    prepare(member, group, session_id, channel, block_counter, config)?
        .execute()
        .await
}
