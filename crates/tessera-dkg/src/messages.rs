//! Key generation messages
//!
//! Every message is broadcast. Secret shares travel inside
//! [`PeerSharesMessage`], encrypted per receiver, so that an accusation can
//! later be checked by anyone holding the revealed ephemeral key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_core::{MemberIndex, Result};
use tessera_crypto::{decode_point, EdwardsPoint, POINT_SIZE, SCALAR_SIZE};
use tessera_protocol::{
    EphemeralPublicKeyMessage, Envelope, MessageRegistry, ProtocolMessage, TaggedMessage,
};

/// Round numbers, in execution order
pub mod round {
    /// Join announcements
    pub const JOIN: u8 = 0;
    /// Ephemeral public key exchange
    pub const EPHEMERAL_KEY_PAIR_GENERATION: u8 = 1;
    /// Symmetric key derivation
    pub const SYMMETRIC_KEY_GENERATION: u8 = 2;
    /// Commitments and encrypted shares
    pub const COMMITMENT: u8 = 3;
    /// Share verification and accusations
    pub const COMMITMENTS_VERIFICATION: u8 = 4;
    /// Share accusation resolution
    pub const SHARES_JUSTIFICATION: u8 = 5;
    /// Public key share points
    pub const POINTS_SHARING: u8 = 6;
    /// Points verification and accusations
    pub const POINTS_VALIDATION: u8 = 7;
    /// Points accusation resolution
    pub const POINTS_JUSTIFICATION: u8 = 8;
    /// Ephemeral key reveals for misbehaving qualified members
    pub const KEY_REVEALING: u8 = 9;
    /// Reconstruction of misbehaving members' secrets
    pub const RECONSTRUCTION: u8 = 10;
    /// Group key and share combination
    pub const COMBINATION: u8 = 11;
    /// Result assembly
    pub const FINALIZATION: u8 = 12;
}

/// Announces that the sender takes part in the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinMessage {
    /// Sending member
    pub sender: MemberIndex,
    /// Session scope
    pub session_id: String,
}

impl TaggedMessage for JoinMessage {
    const TAG: &'static str = "tessera/dkg/join";
}

/// Pedersen commitments `C_k = a_k·G + b_k·H` to the sender's polynomials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCommitmentsMessage {
    /// Sending member
    pub sender: MemberIndex,
    /// Session scope
    pub session_id: String,
    /// Compressed commitments, lowest degree first
    pub commitments: Vec<[u8; POINT_SIZE]>,
}

impl TaggedMessage for MemberCommitmentsMessage {
    const TAG: &'static str = "tessera/dkg/member-commitments";
}

/// Share pairs `(s_ij, t_ij)` encrypted for each receiver `j`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSharesMessage {
    /// Sending member
    pub sender: MemberIndex,
    /// Session scope
    pub session_id: String,
    /// Ciphertext per receiver
    pub shares: BTreeMap<MemberIndex, Vec<u8>>,
}

impl TaggedMessage for PeerSharesMessage {
    const TAG: &'static str = "tessera/dkg/peer-shares";
}

/// Members whose shares failed verification, each with the accuser's
/// ephemeral private key for that pair as evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSharesAccusationsMessage {
    /// Accusing member
    pub sender: MemberIndex,
    /// Session scope
    pub session_id: String,
    /// Revealed private key per accused member
    pub accused_members_keys: BTreeMap<MemberIndex, [u8; SCALAR_SIZE]>,
}

impl TaggedMessage for SecretSharesAccusationsMessage {
    const TAG: &'static str = "tessera/dkg/secret-shares-accusations";
}

/// Feldman points `A_k = a_k·G` of the sender's secret polynomial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPublicKeySharePointsMessage {
    /// Sending member
    pub sender: MemberIndex,
    /// Session scope
    pub session_id: String,
    /// Compressed points, lowest degree first
    pub public_key_share_points: Vec<[u8; POINT_SIZE]>,
}

impl TaggedMessage for MemberPublicKeySharePointsMessage {
    const TAG: &'static str = "tessera/dkg/public-key-share-points";
}

/// Members whose points do not match the share they sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsAccusationsMessage {
    /// Accusing member
    pub sender: MemberIndex,
    /// Session scope
    pub session_id: String,
    /// Revealed private key per accused member
    pub accused_members_keys: BTreeMap<MemberIndex, [u8; SCALAR_SIZE]>,
}

impl TaggedMessage for PointsAccusationsMessage {
    const TAG: &'static str = "tessera/dkg/points-accusations";
}

/// Ephemeral private keys the sender generated for misbehaving qualified
/// members, letting everyone decrypt their shares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisqualifiedEphemeralKeysMessage {
    /// Revealing member
    pub sender: MemberIndex,
    /// Session scope
    pub session_id: String,
    /// Private key per misbehaving member
    pub private_keys: BTreeMap<MemberIndex, [u8; SCALAR_SIZE]>,
}

impl TaggedMessage for DisqualifiedEphemeralKeysMessage {
    const TAG: &'static str = "tessera/dkg/disqualified-ephemeral-keys";
}

/// Every message the key generation protocol exchanges
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DkgMessage {
    /// Join round
    Join(JoinMessage),
    /// Ephemeral key exchange
    EphemeralPublicKey(EphemeralPublicKeyMessage),
    /// Commitment round, public half
    MemberCommitments(MemberCommitmentsMessage),
    /// Commitment round, encrypted half
    PeerShares(PeerSharesMessage),
    /// Share accusations
    SecretSharesAccusations(SecretSharesAccusationsMessage),
    /// Public key share points
    MemberPublicKeySharePoints(MemberPublicKeySharePointsMessage),
    /// Points accusations
    PointsAccusations(PointsAccusationsMessage),
    /// Ephemeral key reveals
    DisqualifiedEphemeralKeys(DisqualifiedEphemeralKeysMessage),
}

macro_rules! impl_from_message {
    ($($variant:ident => $message:ty),+ $(,)?) => {
        $(
            impl From<$message> for DkgMessage {
                fn from(message: $message) -> Self {
                    Self::$variant(message)
                }
            }
        )+
    };
}

impl_from_message! {
    Join => JoinMessage,
    EphemeralPublicKey => EphemeralPublicKeyMessage,
    MemberCommitments => MemberCommitmentsMessage,
    PeerShares => PeerSharesMessage,
    SecretSharesAccusations => SecretSharesAccusationsMessage,
    MemberPublicKeySharePoints => MemberPublicKeySharePointsMessage,
    PointsAccusations => PointsAccusationsMessage,
    DisqualifiedEphemeralKeys => DisqualifiedEphemeralKeysMessage,
}

impl ProtocolMessage for DkgMessage {
    fn sender(&self) -> MemberIndex {
        match self {
            Self::Join(m) => m.sender,
            Self::EphemeralPublicKey(m) => m.sender,
            Self::MemberCommitments(m) => m.sender,
            Self::PeerShares(m) => m.sender,
            Self::SecretSharesAccusations(m) => m.sender,
            Self::MemberPublicKeySharePoints(m) => m.sender,
            Self::PointsAccusations(m) => m.sender,
            Self::DisqualifiedEphemeralKeys(m) => m.sender,
        }
    }

    fn session_id(&self) -> &str {
        match self {
            Self::Join(m) => &m.session_id,
            Self::EphemeralPublicKey(m) => &m.session_id,
            Self::MemberCommitments(m) => &m.session_id,
            Self::PeerShares(m) => &m.session_id,
            Self::SecretSharesAccusations(m) => &m.session_id,
            Self::MemberPublicKeySharePoints(m) => &m.session_id,
            Self::PointsAccusations(m) => &m.session_id,
            Self::DisqualifiedEphemeralKeys(m) => &m.session_id,
        }
    }

    fn round(&self) -> u8 {
        match self {
            Self::Join(_) => round::JOIN,
            Self::EphemeralPublicKey(_) => round::EPHEMERAL_KEY_PAIR_GENERATION,
            Self::MemberCommitments(_) | Self::PeerShares(_) => round::COMMITMENT,
            Self::SecretSharesAccusations(_) => round::COMMITMENTS_VERIFICATION,
            Self::MemberPublicKeySharePoints(_) => round::POINTS_SHARING,
            Self::PointsAccusations(_) => round::POINTS_VALIDATION,
            Self::DisqualifiedEphemeralKeys(_) => round::KEY_REVEALING,
        }
    }

    fn to_envelope(&self) -> Result<Envelope> {
        match self {
            Self::Join(m) => m.encode(),
            Self::EphemeralPublicKey(m) => m.encode(),
            Self::MemberCommitments(m) => m.encode(),
            Self::PeerShares(m) => m.encode(),
            Self::SecretSharesAccusations(m) => m.encode(),
            Self::MemberPublicKeySharePoints(m) => m.encode(),
            Self::PointsAccusations(m) => m.encode(),
            Self::DisqualifiedEphemeralKeys(m) => m.encode(),
        }
    }
}

/// Registry with a decoder for every key generation message
pub fn registry() -> MessageRegistry<DkgMessage> {
    let mut registry = MessageRegistry::new();
    registry
        .register::<JoinMessage>()
        .register::<EphemeralPublicKeyMessage>()
        .register::<MemberCommitmentsMessage>()
        .register::<PeerSharesMessage>()
        .register::<SecretSharesAccusationsMessage>()
        .register::<MemberPublicKeySharePointsMessage>()
        .register::<PointsAccusationsMessage>()
        .register::<DisqualifiedEphemeralKeysMessage>();
    registry
}

/// Decode a list of compressed points, failing on the first invalid one
pub(crate) fn decode_points(encoded: &[[u8; POINT_SIZE]]) -> Option<Vec<EdwardsPoint>> {
    encoded.iter().map(|bytes| decode_point(bytes).ok()).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_every_message_kind_is_registered() {
        let registry = registry();
        let session_id = "session-1".to_string();
        let sender = MemberIndex::new(2);

        let messages: Vec<DkgMessage> = vec![
            JoinMessage {
                sender,
                session_id: session_id.clone(),
            }
            .into(),
            PeerSharesMessage {
                sender,
                session_id: session_id.clone(),
                shares: BTreeMap::from([(MemberIndex::new(1), vec![1, 2, 3])]),
            }
            .into(),
            DisqualifiedEphemeralKeysMessage {
                sender,
                session_id,
                private_keys: BTreeMap::new(),
            }
            .into(),
        ];

        for message in messages {
            let envelope = message.to_envelope().unwrap();
            assert!(registry.is_registered(&envelope.tag));
            assert_eq!(registry.decode(&envelope).unwrap(), message);
        }
    }
}
