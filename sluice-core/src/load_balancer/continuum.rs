//! The continuum: a flat slot table mapping positions to server groups.

use crate::domain::group::{GroupId, SharedGroup};
use crate::error::BuildError;
use crate::load_balancer::dispatcher::dispatch;

/// One position on the continuum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slot {
    /// The group that owns this position.
    pub group: GroupId,
}

/// A built slot table.
///
/// The backing storage holds `capacity()` slots; only the first `len()` are
/// active. Slots past the active length are leftovers and are never read.
/// Once published a continuum is immutable: rebuilds either write into a
/// buffer no reader can see or allocate a fresh one.
#[derive(Debug, Default)]
pub struct Continuum {
    slots: Vec<Slot>,
    len: usize,
}

impl Continuum {
    /// An empty continuum with no backing storage.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Allocate a continuum with room for `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Result<Self, BuildError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|source| BuildError::Allocation {
                slots: capacity,
                source,
            })?;
        slots.resize(capacity, Slot::default());
        Ok(Self { slots, len: 0 })
    }

    /// Number of active slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no slot is active.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots the backing storage can hold.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The active slots, in build order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots[..self.len]
    }

    /// Resolve `hash` to its owning group.
    ///
    /// # Panics
    ///
    /// Panics if the continuum is empty.
    pub fn dispatch(&self, hash: u64) -> GroupId {
        dispatch(self.slots(), hash)
    }

    /// Overwrite the active range with `weight` slots per live group.
    ///
    /// `live` must fit in the backing storage; the builder sizes it first.
    pub(crate) fn fill<'a>(&mut self, live: impl Iterator<Item = &'a SharedGroup>) {
        let mut index = 0;
        for group in live {
            for _ in 0..group.weight() {
                self.slots[index] = Slot { group: group.id };
                index += 1;
            }
        }
        self.len = index;
    }
}
