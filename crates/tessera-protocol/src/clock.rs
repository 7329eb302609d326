//! Block-count clock contract
//!
//! Rounds are scheduled in blocks, never wall-clock time:
//! `deadline = current_block + round_duration_blocks`.

use async_trait::async_trait;
use tessera_core::Result;

/// Monotonic block height source shared by the whole group
#[async_trait]
pub trait BlockCounter: Send + Sync {
    /// Latest observed block height
    fn current_block(&self) -> u64;

    /// Resolve once the block height reaches `height`
    async fn wait_for_block_height(&self, height: u64) -> Result<()>;
}
