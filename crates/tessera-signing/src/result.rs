//! Signing outcome

use tessera_core::MemberIndex;
use tessera_crypto::SIGNATURE_SIZE;
use tessera_protocol::SignatureSubmission;

/// Aggregate signature and the members that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningResult {
    /// Ed25519 signature valid under the group public key
    pub signature: [u8; SIGNATURE_SIZE],
    /// Members that contributed to every signing round
    pub signers: Vec<MemberIndex>,
}

impl SigningResult {
    /// Chain submission of this signature over `message`, made by `submitter`
    pub fn submission(&self, submitter: MemberIndex, message: &[u8]) -> SignatureSubmission {
        SignatureSubmission {
            submitter,
            message: message.to_vec(),
            signature: self.signature.to_vec(),
        }
    }
}
