//! Server group models.

use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::clock::Timestamp;

/// Position of a group within its pool's group list.
///
/// This is the value stored in every continuum slot and returned by dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub u32);

impl GroupId {
    /// The id as an index into the pool's group list.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A set of servers load balanced as one unit.
///
/// Weight and membership are fixed for the life of the group. The retry
/// timestamp and failure counter belong to the health subsystem, which
/// updates them concurrently with rebuilds; they are atomics for that reason.
#[derive(Debug)]
pub struct ServerGroup {
    /// Index of this group within its pool.
    pub id: GroupId,
    /// Human readable group name.
    pub name: String,
    /// Addresses of the servers that make up the group.
    pub servers: Vec<SocketAddr>,
    weight: NonZeroU32,
    /// Microseconds since the epoch until which the group is ejected; 0 = live.
    next_retry: AtomicU64,
    /// Consecutive failures observed by the health subsystem.
    failures: AtomicU32,
}

impl ServerGroup {
    /// Create a live group.
    pub fn new(
        id: GroupId,
        name: impl Into<String>,
        servers: Vec<SocketAddr>,
        weight: NonZeroU32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            servers,
            weight,
            next_retry: AtomicU64::new(0),
            failures: AtomicU32::new(0),
        }
    }

    /// Number of continuum slots this group occupies while live.
    pub fn weight(&self) -> u32 {
        self.weight.get()
    }

    /// When the group becomes eligible again, or `None` if it is live.
    pub fn next_retry(&self) -> Option<Timestamp> {
        match self.next_retry.load(Ordering::Acquire) {
            0 => None,
            micros => Some(Timestamp::from_micros(micros)),
        }
    }

    /// Whether the group may receive traffic at `now`.
    pub fn is_live_at(&self, now: Timestamp) -> bool {
        self.next_retry.load(Ordering::Acquire) <= now.as_micros()
    }

    /// Mark the group dead until `until`.
    pub fn eject_until(&self, until: Timestamp) {
        self.next_retry
            .store(until.as_micros().max(1), Ordering::Release);
    }

    /// Clear the retry timestamp if it still holds `observed`.
    ///
    /// Returns false when the health subsystem re-ejected the group after
    /// `observed` was read; the newer ejection wins.
    pub fn revive(&self, observed: Timestamp) -> bool {
        self.next_retry
            .compare_exchange(observed.as_micros(), 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record a failed probe and return the new consecutive failure count.
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Reset the consecutive failure count.
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
    }

    /// Current consecutive failure count.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }
}

/// A thread-safe reference to a ServerGroup.
pub type SharedGroup = Arc<ServerGroup>;
