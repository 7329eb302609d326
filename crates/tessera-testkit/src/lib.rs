//! Tessera Testing Infrastructure
//!
//! Runs whole groups in one process: every member shares a
//! [`LocalChannel`](tessera_protocol::LocalChannel), a ticking
//! [`LocalBlockCounter`](tessera_protocol::LocalBlockCounter) and a
//! [`LocalChain`](tessera_protocol::LocalChain).
//!
//! ```rust,no_run
//! use tessera_testkit::TestNetwork;
//! use tessera_core::Group;
//!
//! # async fn run() {
//! let network = TestNetwork::new("doc");
//! let group = Group::new(1, 3).unwrap();
//! let results = network.run_dkg(&group, &[1, 2, 3], "dkg-1").await;
//! # }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

/// Group harness
pub mod network;

/// Channel wrapper rewriting envelopes in flight
pub mod tampering;

pub use network::{expect_all, key_shares, TestNetwork};
pub use tampering::TamperingChannel;

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber honouring `RUST_LOG` once per process.
/// Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}
