//! In-process group harness

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{Group, MemberIndex, Result};
use tessera_crypto::PrivateKeyShare;
use tessera_dkg::DkgResult;
use tessera_protocol::{BlockCounter, BroadcastChannel, LocalBlockCounter, LocalChannel, Machine, ProtocolConfig};
use tessera_signing::SigningResult;
use tracing::info;

const DEFAULT_BLOCK_PERIOD: Duration = Duration::from_millis(50);

/// Shared channel, clock and configuration for one simulated group
pub struct TestNetwork {
    channel: Arc<LocalChannel>,
    counter: LocalBlockCounter,
    config: ProtocolConfig,
    block_period: Duration,
}

impl TestNetwork {
    /// Network with default timing producing a block every 50 ms while a
    /// session runs
    pub fn new(name: &str) -> Self {
        Self {
            channel: LocalChannel::new(name),
            counter: LocalBlockCounter::new(),
            config: ProtocolConfig::default(),
            block_period: DEFAULT_BLOCK_PERIOD,
        }
    }

    /// Replace the round timing
    pub fn with_config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    /// The shared broadcast channel
    pub fn channel(&self) -> Arc<dyn BroadcastChannel> {
        self.channel.clone()
    }

    /// The shared block counter
    pub fn block_counter(&self) -> Arc<dyn BlockCounter> {
        Arc::new(self.counter.clone())
    }

    /// Current block height
    pub fn current_block(&self) -> u64 {
        self.counter.current_block()
    }

    /// Run key generation for the `present` members of `group`; absent
    /// members simply never speak. Results come back in `present` order.
    pub async fn run_dkg(&self, group: &Group, present: &[u16], session_id: &str) -> Vec<Result<DkgResult>> {
        self.run_dkg_over(self.channel(), group, present, session_id).await
    }

    /// Same as [`run_dkg`](Self::run_dkg) over a caller-supplied channel
    pub async fn run_dkg_over(
        &self,
        channel: Arc<dyn BroadcastChannel>,
        group: &Group,
        present: &[u16],
        session_id: &str,
    ) -> Vec<Result<DkgResult>> {
        info!(session = session_id, members = present.len(), "Running key generation");
        let mut machines = Vec::with_capacity(present.len());
        let mut results = Vec::new();
        for member in present {
            match tessera_dkg::prepare(
                MemberIndex::new(*member),
                group.clone(),
                session_id,
                channel.clone(),
                self.block_counter(),
                &self.config,
            ) {
                Ok(machine) => machines.push(machine),
                Err(error) => results.push(Err(error)),
            }
        }
        if !results.is_empty() {
            return results;
        }
        self.drive(machines).await
    }

    /// Sign `message` with every share in `shares`. Results come back in
    /// `shares` order.
    pub async fn run_signing(
        &self,
        shares: &[PrivateKeyShare],
        message: &[u8],
        session_id: &str,
    ) -> Vec<Result<SigningResult>> {
        self.run_signing_over(self.channel(), shares, message, session_id).await
    }

    /// Same as [`run_signing`](Self::run_signing) over a caller-supplied
    /// channel
    pub async fn run_signing_over(
        &self,
        channel: Arc<dyn BroadcastChannel>,
        shares: &[PrivateKeyShare],
        message: &[u8],
        session_id: &str,
    ) -> Vec<Result<SigningResult>> {
        info!(session = session_id, signers = shares.len(), "Running signing");
        let mut machines = Vec::with_capacity(shares.len());
        for share in shares {
            match tessera_signing::prepare(
                share,
                message,
                session_id,
                channel.clone(),
                self.block_counter(),
                &self.config,
            ) {
                Ok(machine) => machines.push(machine),
                Err(error) => return vec![Err(error)],
            }
        }
        self.drive(machines).await
    }

    /// Execute prepared machines, one task per member, while the clock ticks
    async fn drive<M, O>(&self, machines: Vec<Machine<M, O>>) -> Vec<Result<O>>
    where
        M: tessera_protocol::ProtocolMessage,
        O: Send + 'static,
    {
        let ticker = self.counter.spawn_ticker(self.block_period);
        let tasks = machines.into_iter().map(|machine| tokio::spawn(machine.execute()));
        let results = join_all(tasks).await;
        ticker.abort();
        results
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|error| panic!("member task failed: {error}")))
            .collect()
    }
}

/// Unwrap every result, panicking with the failing member's error
pub fn expect_all<O>(results: Vec<Result<O>>) -> Vec<O> {
    results
        .into_iter()
        .enumerate()
        .map(|(i, result)| result.unwrap_or_else(|error| panic!("member #{i} failed: {error}")))
        .collect()
}

/// Shares of the given DKG results, in order
pub fn key_shares(results: &[DkgResult]) -> Vec<PrivateKeyShare> {
    results.iter().map(|result| result.private_key_share.clone()).collect()
}
