//! Chain contract
//!
//! The chain supplies group parameters when a session starts and records
//! finalized results. Chain-specific encodings stay behind the trait.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tessera_core::{Group, MemberIndex, ProtocolError, Result};
use tracing::info;

/// Group parameters published on chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupParameters {
    /// Number of members
    pub group_size: usize,
    /// Maximum number of tolerated malicious members
    pub dishonest_threshold: usize,
}

impl GroupParameters {
    /// Build the session group
    pub fn to_group(&self) -> Result<Group> {
        Group::new(self.dishonest_threshold, self.group_size)
    }
}

/// Finalized key generation outcome as submitted by one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgSubmission {
    /// Submitting member
    pub submitter: MemberIndex,
    /// Compressed group public key
    pub group_public_key: [u8; 32],
    /// Members disqualified during the session
    pub disqualified: Vec<MemberIndex>,
    /// Members that never showed up
    pub inactive: Vec<MemberIndex>,
}

/// Finalized signature as submitted by one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSubmission {
    /// Submitting member
    pub submitter: MemberIndex,
    /// Signed message
    pub message: Vec<u8>,
    /// 64-byte Ed25519 signature
    pub signature: Vec<u8>,
}

/// Chain client used at session boundaries
#[async_trait]
pub trait Chain: Send + Sync {
    /// Current group parameters
    async fn group_parameters(&self) -> Result<GroupParameters>;

    /// Record a key generation result
    async fn submit_dkg_result(&self, submission: DkgSubmission) -> Result<()>;

    /// Record a signature
    async fn submit_signature(&self, submission: SignatureSubmission) -> Result<()>;
}

/// In-memory chain that accepts one group public key per session
pub struct LocalChain {
    parameters: GroupParameters,
    dkg_submissions: Mutex<Vec<DkgSubmission>>,
    signature_submissions: Mutex<Vec<SignatureSubmission>>,
}

impl LocalChain {
    /// Chain publishing `parameters`
    pub fn new(parameters: GroupParameters) -> Self {
        Self {
            parameters,
            dkg_submissions: Mutex::new(Vec::new()),
            signature_submissions: Mutex::new(Vec::new()),
        }
    }

    /// Key generation results recorded so far
    pub fn dkg_submissions(&self) -> Vec<DkgSubmission> {
        self.dkg_submissions.lock().clone()
    }

    /// Signatures recorded so far
    pub fn signature_submissions(&self) -> Vec<SignatureSubmission> {
        self.signature_submissions.lock().clone()
    }
}

#[async_trait]
impl Chain for LocalChain {
    async fn group_parameters(&self) -> Result<GroupParameters> {
        Ok(self.parameters)
    }

    async fn submit_dkg_result(&self, submission: DkgSubmission) -> Result<()> {
        let mut submissions = self.dkg_submissions.lock();
        if let Some(first) = submissions.first() {
            if first.group_public_key != submission.group_public_key {
                return Err(ProtocolError::chain(format!(
                    "member [{}] submitted a group public key conflicting with member [{}]",
                    submission.submitter, first.submitter
                )));
            }
        }
        info!(submitter = %submission.submitter, "Recorded key generation result");
        submissions.push(submission);
        Ok(())
    }

    async fn submit_signature(&self, submission: SignatureSubmission) -> Result<()> {
        if submission.signature.len() != 64 {
            return Err(ProtocolError::chain(format!(
                "signature must be 64 bytes, got {}",
                submission.signature.len()
            )));
        }
        info!(submitter = %submission.submitter, "Recorded signature");
        self.signature_submissions.lock().push(submission);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn submission(submitter: u16, key: u8) -> DkgSubmission {
        DkgSubmission {
            submitter: MemberIndex::new(submitter),
            group_public_key: [key; 32],
            disqualified: vec![],
            inactive: vec![],
        }
    }

    #[tokio::test]
    async fn test_conflicting_group_keys_are_rejected() {
        let chain = LocalChain::new(GroupParameters {
            group_size: 3,
            dishonest_threshold: 1,
        });

        chain.submit_dkg_result(submission(1, 9)).await.unwrap();
        chain.submit_dkg_result(submission(2, 9)).await.unwrap();
        assert_matches!(
            chain.submit_dkg_result(submission(3, 8)).await,
            Err(ProtocolError::Chain { .. })
        );
        assert_eq!(chain.dkg_submissions().len(), 2);
    }

    #[tokio::test]
    async fn test_group_parameters_build_a_group() {
        let chain = LocalChain::new(GroupParameters {
            group_size: 5,
            dishonest_threshold: 2,
        });

        let group = chain.group_parameters().await.unwrap().to_group().unwrap();
        assert_eq!(group.honest_threshold(), 3);
    }
}
