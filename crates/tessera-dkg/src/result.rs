//! Key generation outcome

use tessera_core::MemberIndex;
use tessera_crypto::{PrivateKeyShare, POINT_SIZE};
use tessera_protocol::DkgSubmission;

/// What one member holds after a successful key generation
#[derive(Debug, Clone)]
pub struct DkgResult {
    /// Compressed group public key `Y`
    pub group_public_key: [u8; POINT_SIZE],
    /// This member's share of the group key
    pub private_key_share: PrivateKeyShare,
    /// Members whose polynomials make up the group key
    pub qualified: Vec<MemberIndex>,
    /// Members disqualified during the session
    pub disqualified: Vec<MemberIndex>,
    /// Members that stopped responding
    pub inactive: Vec<MemberIndex>,
}

impl DkgResult {
    /// Chain submission for this result
    pub fn submission(&self) -> DkgSubmission {
        DkgSubmission {
            submitter: self.private_key_share.member(),
            group_public_key: self.group_public_key,
            disqualified: self.disqualified.clone(),
            inactive: self.inactive.clone(),
        }
    }
}
