//! Session error taxonomy
//!
//! A single error enum covers the four fault classes a member can observe:
//!
//! - **Local faults**: this member cannot produce its own output in time
//!   (`Timeout`, `OutgoingMessage`).
//! - **Peer faults**: a peer's message is malformed or fails verification
//!   (`InvalidEphemeralPublicKeyMessage`, `InvalidMessage`). States absorb
//!   these at the round boundary; they only surface from direct phase calls.
//! - **Protocol faults**: quorum lost after inactivity or disqualification
//!   (`InsufficientQuorum`).
//! - **Sequencing faults**: a round entered without its prerequisites
//!   (`MissingSymmetricKey`).
//!
//! The executor wraps whatever terminates a session in `StateFailed`, naming
//! the state and member, so callers receive a single descriptive error.

use crate::group::MemberIndex;
use serde::{Deserialize, Serialize};

/// Unified error type for protocol sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ProtocolError {
    /// The member's own round output was not produced before the deadline
    #[error("Timeout in phase {phase}: {reason}")]
    Timeout {
        /// Phase that stalled
        phase: String,
        /// What was not produced on time
        reason: String,
    },

    /// The member could not produce its own outbound message
    #[error("Cannot produce outgoing message in phase {phase}: {reason}")]
    OutgoingMessage {
        /// Phase that failed
        phase: String,
        /// Cause reported by the producing step
        reason: String,
    },

    /// A round needing a pairwise key was entered before the key existed
    #[error("Member [{member}] cannot get symmetric key with member [{peer}]")]
    MissingSymmetricKey {
        /// Member running the round
        member: MemberIndex,
        /// Peer without a derived key
        peer: MemberIndex,
    },

    /// A peer's ephemeral key message lacks an entry for the receiver
    #[error("Member [{sender}] sent invalid ephemeral public key message")]
    InvalidEphemeralPublicKeyMessage {
        /// Misbehaving sender
        sender: MemberIndex,
    },

    /// A peer's message failed validation
    #[error("Invalid message from member [{sender}]: {reason}")]
    InvalidMessage {
        /// Misbehaving sender
        sender: MemberIndex,
        /// Why the message was rejected
        reason: String,
    },

    /// Too few members remain to continue the session
    #[error("Insufficient quorum in phase {phase}: {operating} operating members, {required} required")]
    InsufficientQuorum {
        /// Phase where quorum was lost
        phase: String,
        /// Members still operating
        operating: usize,
        /// Members required to continue
        required: usize,
    },

    /// Group parameters are inconsistent
    #[error("Invalid group: {message}")]
    InvalidGroup {
        /// Description of the inconsistency
        message: String,
    },

    /// Cryptographic operation failed
    #[error("Crypto error: {message}")]
    Crypto {
        /// Description of the cryptographic failure
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure
        message: String,
    },

    /// Broadcast channel failure
    #[error("Channel error: {message}")]
    Channel {
        /// Description of the channel failure
        message: String,
    },

    /// Chain client failure
    #[error("Chain error: {message}")]
    Chain {
        /// Description of the chain failure
        message: String,
    },

    /// Invalid protocol configuration
    #[error("Config error: {message}")]
    Config {
        /// Description of the configuration problem
        message: String,
    },

    /// The external signing capability failed
    #[error("Signing capability error: {message}")]
    Capability {
        /// Description reported by the capability
        message: String,
    },

    /// A state terminated the session
    #[error("State {state} failed for member [{member}]: {source}")]
    StateFailed {
        /// Name of the terminal state
        state: String,
        /// Member whose state machine stopped
        member: MemberIndex,
        /// Underlying cause
        source: Box<ProtocolError>,
    },
}

impl ProtocolError {
    /// Create a timeout error for a phase
    pub fn timeout(phase: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Timeout {
            phase: phase.into(),
            reason: reason.into(),
        }
    }

    /// Create an outgoing message error for a phase
    pub fn outgoing_message(phase: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OutgoingMessage {
            phase: phase.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid message error
    pub fn invalid_message(sender: MemberIndex, reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            sender,
            reason: reason.into(),
        }
    }

    /// Create an invalid group error
    pub fn invalid_group(message: impl Into<String>) -> Self {
        Self::InvalidGroup {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a channel error
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }

    /// Create a chain error
    pub fn chain(message: impl Into<String>) -> Self {
        Self::Chain {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a capability error
    pub fn capability(message: impl Into<String>) -> Self {
        Self::Capability {
            message: message.into(),
        }
    }

    /// Wrap a cause with the state and member it terminated
    pub fn state_failed(state: impl Into<String>, member: MemberIndex, cause: ProtocolError) -> Self {
        Self::StateFailed {
            state: state.into(),
            member,
            source: Box::new(cause),
        }
    }

    /// Innermost cause, unwrapping any `StateFailed` layers
    pub fn root_cause(&self) -> &ProtocolError {
        match self {
            Self::StateFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether the innermost cause is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), Self::Timeout { .. })
    }
}

impl From<bincode::Error> for ProtocolError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Standard Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
