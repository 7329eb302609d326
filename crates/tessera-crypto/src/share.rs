//! Threshold key share produced by key generation and consumed by signing

use crate::encoding::encode_point;
use crate::POINT_SIZE;
use curve25519_dalek::{EdwardsPoint, Scalar};
use std::collections::BTreeMap;
use std::fmt;
use tessera_core::MemberIndex;
use zeroize::Zeroize;

/// One member's share of the group signing key
#[derive(Clone)]
pub struct PrivateKeyShare {
    member: MemberIndex,
    secret_share: Scalar,
    group_public_key: [u8; POINT_SIZE],
    verifying_shares: BTreeMap<MemberIndex, [u8; POINT_SIZE]>,
    group_size: usize,
    dishonest_threshold: usize,
}

impl PrivateKeyShare {
    /// Assemble a share from combined key material
    pub fn new(
        member: MemberIndex,
        secret_share: Scalar,
        group_public_key: &EdwardsPoint,
        verifying_shares: &BTreeMap<MemberIndex, EdwardsPoint>,
        group_size: usize,
        dishonest_threshold: usize,
    ) -> Self {
        Self {
            member,
            secret_share,
            group_public_key: encode_point(group_public_key),
            verifying_shares: verifying_shares
                .iter()
                .map(|(id, point)| (*id, encode_point(point)))
                .collect(),
            group_size,
            dishonest_threshold,
        }
    }

    /// Owning member
    pub fn member(&self) -> MemberIndex {
        self.member
    }

    /// Secret share `x_i`
    pub fn secret_share(&self) -> &Scalar {
        &self.secret_share
    }

    /// Canonical encoding of the secret share
    pub fn secret_share_bytes(&self) -> [u8; 32] {
        self.secret_share.to_bytes()
    }

    /// Compressed group public key
    pub fn group_public_key(&self) -> [u8; POINT_SIZE] {
        self.group_public_key
    }

    /// Compressed public share `x_j·G` of every member holding a share
    pub fn verifying_shares(&self) -> &BTreeMap<MemberIndex, [u8; POINT_SIZE]> {
        &self.verifying_shares
    }

    /// Size of the group the key was generated for
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Dishonest threshold the key was generated for
    pub fn dishonest_threshold(&self) -> usize {
        self.dishonest_threshold
    }

    /// Minimum number of signers, one more than the dishonest threshold
    pub fn min_signers(&self) -> usize {
        self.dishonest_threshold + 1
    }
}

impl Drop for PrivateKeyShare {
    fn drop(&mut self) {
        self.secret_share.zeroize();
    }
}

impl fmt::Debug for PrivateKeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyShare")
            .field("member", &self.member)
            .field("secret_share", &"<redacted>")
            .field("group_public_key", &hex::encode(self.group_public_key))
            .field("signers", &self.verifying_shares.len())
            .finish()
    }
}
