//! Group-membership reconciliation.
//!
//! All three service adapters converge remote group membership the same way:
//! resolve the desired group names to remote identifiers (creating missing
//! groups as they go), then compute the minimal add/remove delta against the
//! memberships the service currently reports. The resolution step is
//! service-specific; the delta is not, so it lives here as a pure function.

use std::collections::HashSet;
use std::hash::Hash;

/// The minimal set of membership changes that converges `actual` to
/// `desired`.
///
/// Additions and removals are applied as independent remote calls; a partial
/// failure leaves the remote service between the two states and is not
/// rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupDelta<I> {
    pub to_add: Vec<I>,
    pub to_remove: Vec<I>,
}

impl<I> GroupDelta<I> {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute the membership delta between a desired and an actual group set.
///
/// `desired` holds the resolved identifiers of every group the authority
/// says the user should have; `actual` holds what the service currently
/// reports. An empty `desired` set strips the user of every group, which is
/// how disablement clears membership. Output is sorted so logs and tests are
/// deterministic.
pub fn diff<I>(desired: &HashSet<I>, actual: &HashSet<I>) -> GroupDelta<I>
where
    I: Eq + Hash + Ord + Clone,
{
    let mut to_add: Vec<I> = desired.difference(actual).cloned().collect();
    let mut to_remove: Vec<I> = actual.difference(desired).cloned().collect();
    to_add.sort();
    to_remove.sort();
    GroupDelta { to_add, to_remove }
}
