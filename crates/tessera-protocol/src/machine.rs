//! Block-driven state machine executor
//!
//! For every state the machine:
//!
//! 1. fixes the deadline `current_block + active_blocks`,
//! 2. races the state's `initiate` against the deadline (losing the race is
//!    a timeout naming the state; the computation is dropped),
//! 3. broadcasts the outbound messages,
//! 4. replays messages buffered for this round, then routes live messages
//!    until the state is complete or the deadline passes,
//! 5. asks the state for its successor.
//!
//! Messages for later rounds are buffered; stale rounds, other sessions,
//! self-sent messages and senders that stopped operating are dropped.

use crate::channel::{ProtocolMessage, TypedChannel, TypedReceiver};
use crate::clock::BlockCounter;
use crate::state::{State, Step};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{ProtocolError, Result};
use tracing::{debug, info, warn};

/// Drives a chain of states to completion for one member
pub struct Machine<M, O> {
    channel: TypedChannel<M>,
    receiver: TypedReceiver<M>,
    block_counter: Arc<dyn BlockCounter>,
    session_id: String,
    initial_state: Box<dyn State<M, O>>,
}

impl<M, O> std::fmt::Debug for Machine<M, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl<M: ProtocolMessage, O: Send + 'static> Machine<M, O> {
    /// Create a machine starting at `initial_state`.
    ///
    /// The machine subscribes to the channel here, so every message sent
    /// after construction reaches it even if `execute` is polled late.
    pub fn new(
        channel: TypedChannel<M>,
        block_counter: Arc<dyn BlockCounter>,
        session_id: impl Into<String>,
        initial_state: Box<dyn State<M, O>>,
    ) -> Self {
        let receiver = channel.subscribe();
        Self {
            channel,
            receiver,
            block_counter,
            session_id: session_id.into(),
            initial_state,
        }
    }

    /// Run every state until one returns [`Step::Done`].
    ///
    /// Any failure is reported as [`ProtocolError::StateFailed`] naming the
    /// state and member; no partial output is ever returned.
    pub async fn execute(mut self) -> Result<O> {
        let mut buffered: BTreeMap<u8, Vec<M>> = BTreeMap::new();
        let mut state = self.initial_state;

        loop {
            let name = state.name();
            let member = state.member_index();

            info!(
                member = %member,
                state = name,
                round = state.round(),
                channel = self.channel.name(),
                "Entering state"
            );

            run_state(
                &self.channel,
                self.block_counter.as_ref(),
                &self.session_id,
                state.as_mut(),
                &mut self.receiver,
                &mut buffered,
            )
            .await
            .map_err(|error| ProtocolError::state_failed(name, member, error))?;

            match state
                .next()
                .map_err(|error| ProtocolError::state_failed(name, member, error))?
            {
                Step::Continue(next) => state = next,
                Step::Done(output) => {
                    info!(member = %member, state = name, "State machine finished");
                    return Ok(output);
                }
            }
        }
    }
}

async fn run_state<M: ProtocolMessage, O>(
    channel: &TypedChannel<M>,
    block_counter: &dyn BlockCounter,
    session_id: &str,
    state: &mut dyn State<M, O>,
    receiver: &mut TypedReceiver<M>,
    buffered: &mut BTreeMap<u8, Vec<M>>,
) -> Result<()> {
    let name = state.name();
    let active_blocks = state.active_blocks();

    if active_blocks == 0 {
        let outbound = state.initiate().await?;
        return send_all(channel, name, outbound).await;
    }

    let deadline = block_counter.current_block() + active_blocks;
    let timeout = block_counter.wait_for_block_height(deadline);
    tokio::pin!(timeout);

    let outbound = tokio::select! {
        outbound = state.initiate() => outbound?,
        reached = &mut timeout => {
            reached?;
            return Err(ProtocolError::timeout(
                name,
                "outgoing messages were not generated on time",
            ));
        }
    };
    send_all(channel, name, outbound).await?;

    for message in take_buffered(buffered, state.round()) {
        route(session_id, state, message, buffered)?;
    }

    while !state.is_complete() {
        tokio::select! {
            message = receiver.recv() => {
                let message = message
                    .ok_or_else(|| ProtocolError::channel("broadcast channel closed"))?;
                route(session_id, state, message, buffered)?;
            }
            reached = &mut timeout => {
                reached?;
                warn!(
                    member = %state.member_index(),
                    state = name,
                    deadline,
                    "Round deadline reached before every peer was heard"
                );
                break;
            }
        }
    }

    Ok(())
}

/// Messages buffered for `round`. Rounds before it can no longer be
/// consumed and are discarded.
fn take_buffered<M>(buffered: &mut BTreeMap<u8, Vec<M>>, round: u8) -> Vec<M> {
    buffered.retain(|buffered_round, _| *buffered_round >= round);
    buffered.remove(&round).unwrap_or_default()
}

async fn send_all<M: ProtocolMessage>(
    channel: &TypedChannel<M>,
    name: &str,
    outbound: Vec<M>,
) -> Result<()> {
    for message in outbound {
        channel
            .send(&message)
            .await
            .map_err(|error| ProtocolError::outgoing_message(name, error.to_string()))?;
    }
    Ok(())
}

fn route<M: ProtocolMessage, O>(
    session_id: &str,
    state: &mut dyn State<M, O>,
    message: M,
    buffered: &mut BTreeMap<u8, Vec<M>>,
) -> Result<()> {
    let member = state.member_index();
    let sender = message.sender();

    if message.session_id() != session_id {
        debug!(member = %member, sender = %sender, "Dropping message from another session");
        return Ok(());
    }
    if sender == member {
        return Ok(());
    }
    if !state.group().is_operating(sender) {
        debug!(member = %member, sender = %sender, "Dropping message from non-operating sender");
        return Ok(());
    }

    match message.round().cmp(&state.round()) {
        Ordering::Less => {
            debug!(
                member = %member,
                sender = %sender,
                round = message.round(),
                current = state.round(),
                "Dropping stale message"
            );
            Ok(())
        }
        Ordering::Greater => {
            buffered.entry(message.round()).or_default().push(message);
            Ok(())
        }
        Ordering::Equal => match state.receive(message) {
            Err(error @ ProtocolError::InvalidMessage { .. }) => {
                warn!(member = %member, sender = %sender, error = %error, "Rejected message");
                Ok(())
            }
            other => other,
        },
    }
}
