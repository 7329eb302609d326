//! Protocol state contract driven by the [`Machine`](crate::Machine)

use async_trait::async_trait;
use tessera_core::{Group, MemberIndex, Result};

/// Outcome of leaving a state
pub enum Step<M, O> {
    /// Move to the next state
    Continue(Box<dyn State<M, O>>),
    /// The machine finished with an output
    Done(O),
}

/// One round of a member's protocol run.
///
/// A state owns everything the member accumulated so far and hands it to the
/// next state by value from [`State::next`].
#[async_trait]
pub trait State<M, O>: Send {
    /// State name used in logs and errors
    fn name(&self) -> &'static str;

    /// Round number; messages carry it so early ones can be buffered
    fn round(&self) -> u8;

    /// Blocks the state stays active. Zero marks a computation-only state
    /// that neither waits for messages nor races a deadline.
    fn active_blocks(&self) -> u64;

    /// Member running this state
    fn member_index(&self) -> MemberIndex;

    /// Group view used to filter senders
    fn group(&self) -> &Group;

    /// Local computation for the round, producing the outbound messages
    async fn initiate(&mut self) -> Result<Vec<M>>;

    /// Absorb one routed inbound message of this round
    fn receive(&mut self, message: M) -> Result<()>;

    /// Whether every expected sender has been heard from
    fn is_complete(&self) -> bool {
        false
    }

    /// Close the round and produce the following state
    fn next(self: Box<Self>) -> Result<Step<M, O>>;
}
