//! Request dispatch against a built continuum.

use crate::domain::group::GroupId;
use crate::load_balancer::continuum::Slot;

/// Resolve `hash` to the group owning slot `hash % continuum.len()`.
///
/// Dispatch does no liveness check of its own; a group ejected since the last
/// rebuild keeps its slots until the next rebuild publishes.
///
/// # Panics
///
/// Panics if `continuum` is empty. Dispatching before the first successful
/// rebuild is a caller ordering bug, not a runtime condition.
#[inline]
pub fn dispatch(continuum: &[Slot], hash: u64) -> GroupId {
    assert!(
        !continuum.is_empty(),
        "dispatch on an empty continuum; rebuild must succeed first"
    );
    let index = hash % continuum.len() as u64;
    continuum[index as usize].group
}
