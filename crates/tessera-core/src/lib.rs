//! # Tessera Core
//!
//! Foundation types shared by the distributed key generation and threshold
//! signing protocols:
//!
//! - **group**: member indices and the group model (inactive and disqualified
//!   bookkeeping, honest/dishonest thresholds)
//! - **errors**: the session-level error taxonomy
//!
//! Nothing in this crate performs I/O or cryptography.

#![forbid(unsafe_code)]

/// Unified error type for protocol sessions
pub mod errors;

/// Group membership and participant bookkeeping
pub mod group;

pub use errors::{ProtocolError, Result};
pub use group::{Group, MemberIndex};
