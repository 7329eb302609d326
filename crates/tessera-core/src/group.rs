//! Group model
//!
//! A group is a fixed, ordered set of members indexed `1..=n`. During a
//! session members drop out in two ways:
//!
//! - **inactive**: the member did not show up for a round (join or ephemeral
//!   key exchange) and is excluded from further expectations.
//! - **disqualified**: the member misbehaved or went silent in a mandatory
//!   round. Disqualification is permanent for the session; re-disqualifying
//!   is a no-op.
//!
//! Only accusation resolution and round boundaries mutate the group; the
//! executor serializes those mutations by construction, since one state owns
//! the group at a time.

use crate::errors::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One-based index of a member within its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberIndex(u16);

impl MemberIndex {
    /// Create a member index
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Raw index value
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Index as a field element input for polynomial evaluation
    pub fn as_u64(self) -> u64 {
        u64::from(self.0)
    }
}

impl fmt::Display for MemberIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for MemberIndex {
    fn from(index: u16) -> Self {
        Self(index)
    }
}

/// Protocol group with honest/dishonest thresholds and dropout tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    dishonest_threshold: usize,
    member_indices: Vec<MemberIndex>,
    inactive: BTreeSet<MemberIndex>,
    disqualified: BTreeSet<MemberIndex>,
}

impl Group {
    /// Create a group of `group_size` members tolerating up to
    /// `dishonest_threshold` malicious ones.
    pub fn new(dishonest_threshold: usize, group_size: usize) -> Result<Self> {
        if group_size == 0 {
            return Err(ProtocolError::invalid_group("group must have members"));
        }
        if group_size > usize::from(u16::MAX) {
            return Err(ProtocolError::invalid_group(format!(
                "group size {group_size} exceeds the maximum member index"
            )));
        }
        if dishonest_threshold >= group_size {
            return Err(ProtocolError::invalid_group(format!(
                "dishonest threshold {dishonest_threshold} must be below group size {group_size}"
            )));
        }

        let member_indices = (1..=group_size)
            .map(|i| MemberIndex::new(i as u16))
            .collect();

        Ok(Self {
            dishonest_threshold,
            member_indices,
            inactive: BTreeSet::new(),
            disqualified: BTreeSet::new(),
        })
    }

    /// Number of members the group was created with
    pub fn group_size(&self) -> usize {
        self.member_indices.len()
    }

    /// Maximum number of tolerated malicious members
    pub fn dishonest_threshold(&self) -> usize {
        self.dishonest_threshold
    }

    /// Minimum number of honest members the protocols require
    pub fn honest_threshold(&self) -> usize {
        self.group_size() - self.dishonest_threshold
    }

    /// All member indices in ascending order
    pub fn member_indices(&self) -> &[MemberIndex] {
        &self.member_indices
    }

    /// Whether `id` belongs to the group at all
    pub fn is_member(&self, id: MemberIndex) -> bool {
        self.member_indices.binary_search(&id).is_ok()
    }

    /// Whether `id` has not been marked inactive
    pub fn is_active(&self, id: MemberIndex) -> bool {
        self.is_member(id) && !self.inactive.contains(&id)
    }

    /// Whether `id` has been disqualified
    pub fn is_disqualified(&self, id: MemberIndex) -> bool {
        self.disqualified.contains(&id)
    }

    /// Whether `id` is still expected to take part in rounds
    pub fn is_operating(&self, id: MemberIndex) -> bool {
        self.is_active(id) && !self.is_disqualified(id)
    }

    /// Mark a member as inactive for the rest of the session
    pub fn mark_inactive(&mut self, id: MemberIndex) {
        if self.is_member(id) {
            self.inactive.insert(id);
        }
    }

    /// Permanently disqualify a member; repeated calls are no-ops
    pub fn disqualify(&mut self, id: MemberIndex) {
        if self.is_member(id) {
            self.disqualified.insert(id);
        }
    }

    /// All members minus the disqualified ones
    pub fn qualified_members(&self) -> Vec<MemberIndex> {
        self.member_indices
            .iter()
            .copied()
            .filter(|id| !self.is_disqualified(*id))
            .collect()
    }

    /// Members neither inactive nor disqualified
    pub fn operating_members(&self) -> Vec<MemberIndex> {
        self.member_indices
            .iter()
            .copied()
            .filter(|id| self.is_operating(*id))
            .collect()
    }

    /// Operating members other than `id`
    pub fn operating_peers(&self, id: MemberIndex) -> Vec<MemberIndex> {
        self.operating_members()
            .into_iter()
            .filter(|peer| *peer != id)
            .collect()
    }

    /// Members marked inactive
    pub fn inactive_members(&self) -> Vec<MemberIndex> {
        self.inactive.iter().copied().collect()
    }

    /// Members disqualified so far
    pub fn disqualified_members(&self) -> Vec<MemberIndex> {
        self.disqualified.iter().copied().collect()
    }

    /// Fail with `InsufficientQuorum` unless at least `required` members
    /// are still operating.
    pub fn ensure_quorum(&self, phase: &str, required: usize) -> Result<()> {
        let operating = self.operating_members().len();
        if operating < required {
            return Err(ProtocolError::InsufficientQuorum {
                phase: phase.to_string(),
                operating,
                required,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn idx(i: u16) -> MemberIndex {
        MemberIndex::new(i)
    }

    #[test]
    fn test_group_thresholds() {
        let group = Group::new(2, 5).unwrap();
        assert_eq!(group.group_size(), 5);
        assert_eq!(group.dishonest_threshold(), 2);
        assert_eq!(group.honest_threshold(), 3);
        assert_eq!(
            group.member_indices(),
            &[idx(1), idx(2), idx(3), idx(4), idx(5)]
        );
    }

    #[test]
    fn test_invalid_group_parameters() {
        assert_matches!(Group::new(0, 0), Err(ProtocolError::InvalidGroup { .. }));
        assert_matches!(Group::new(3, 3), Err(ProtocolError::InvalidGroup { .. }));
    }

    #[test]
    fn test_disqualification_is_monotonic() {
        let mut group = Group::new(1, 4).unwrap();
        group.disqualify(idx(2));
        group.disqualify(idx(2));

        assert!(group.is_disqualified(idx(2)));
        assert_eq!(group.disqualified_members(), vec![idx(2)]);
        assert_eq!(group.qualified_members(), vec![idx(1), idx(3), idx(4)]);
    }

    #[test]
    fn test_inactive_members_stay_qualified() {
        let mut group = Group::new(1, 4).unwrap();
        group.mark_inactive(idx(4));

        assert!(!group.is_active(idx(4)));
        assert!(!group.is_operating(idx(4)));
        assert_eq!(group.qualified_members().len(), 4);
        assert_eq!(group.operating_members(), vec![idx(1), idx(2), idx(3)]);
        assert_eq!(group.operating_peers(idx(1)), vec![idx(2), idx(3)]);
    }

    #[test]
    fn test_non_members_are_ignored() {
        let mut group = Group::new(0, 3).unwrap();
        group.disqualify(idx(9));
        group.mark_inactive(idx(0));

        assert!(group.disqualified_members().is_empty());
        assert!(group.inactive_members().is_empty());
        assert!(!group.is_active(idx(9)));
    }

    #[test]
    fn test_quorum_check() {
        let mut group = Group::new(1, 3).unwrap();
        assert!(group.ensure_quorum("commitment", 2).is_ok());

        group.disqualify(idx(1));
        group.mark_inactive(idx(2));
        assert_matches!(
            group.ensure_quorum("commitment", 2),
            Err(ProtocolError::InsufficientQuorum { operating: 1, required: 2, .. })
        );
    }
}
