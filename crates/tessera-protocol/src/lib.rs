//! # Tessera Protocol
//!
//! Protocol-agnostic plumbing for multi-round member state machines:
//!
//! - **state / machine**: the [`State`] contract and the block-driven
//!   [`Machine`] executor with deadlines, buffering and message routing
//! - **channel**: the broadcast channel contract, tag-keyed
//!   [`MessageRegistry`] and the typed channel built on it
//! - **clock**: the block counter contract
//! - **chain**: the chain contract used at session boundaries
//! - **handshake**: the ephemeral key exchange both protocols start with
//! - **local**: in-process channel and block counter
//! - **config**: round timing

#![forbid(unsafe_code)]

/// Chain contract
pub mod chain;

/// Broadcast channel contract and message dispatch
pub mod channel;

/// Block counter contract
pub mod clock;

/// Round timing configuration
pub mod config;

/// Ephemeral key exchange and symmetric key derivation
pub mod handshake;

/// In-process providers
pub mod local;

/// Block-driven executor
pub mod machine;

/// State contract
pub mod state;

pub use chain::{Chain, DkgSubmission, GroupParameters, LocalChain, SignatureSubmission};
pub use channel::{
    BroadcastChannel, Envelope, MessageRegistry, ProtocolMessage, TaggedMessage, TypedChannel,
    TypedReceiver,
};
pub use clock::BlockCounter;
pub use config::{DkgTiming, ProtocolConfig, SigningTiming};
pub use handshake::{disqualify_incomplete_senders, EphemeralPublicKeyMessage, PairwiseKeys};
pub use local::{LocalBlockCounter, LocalChannel};
pub use machine::Machine;
pub use state::{State, Step};
