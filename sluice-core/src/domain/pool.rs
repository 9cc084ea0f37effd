//! Server pools: the routing target sets requests are spread across.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::clock::Timestamp;
use crate::domain::group::{GroupId, ServerGroup, SharedGroup};
use crate::load_balancer::continuum::Continuum;

/// A pool of server groups with a lock-free published continuum.
///
/// The continuum lives in an `ArcSwap`, so dispatch on the request path is a
/// single atomic load followed by an index. Rebuilds are serialized by the
/// pool's build lock, which dispatch never touches.
#[derive(Debug)]
pub struct ServerPool {
    /// Index of the pool within the proxy's registry.
    pub index: u32,
    /// Pool name.
    pub name: String,
    groups: Vec<SharedGroup>,
    auto_eject_hosts: bool,
    continuum: ArcSwap<Continuum>,
    live_groups: AtomicU32,
    /// Earliest retry time among dead groups; 0 = none.
    next_rebuild: AtomicU64,
    pub(crate) build: Mutex<BuildState>,
}

/// Builder-owned state, only touched under the build lock.
#[derive(Debug, Default)]
pub(crate) struct BuildState {
    /// Slots the current storage holds, in weight units. Never decreases.
    pub(crate) capacity: usize,
    /// The continuum retired by the last publish, reused once unreferenced.
    pub(crate) spare: Option<Arc<Continuum>>,
}

/// Point-in-time view of a pool for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Pool name.
    pub name: String,
    /// Total configured groups.
    pub groups: usize,
    /// Groups found live by the last rebuild.
    pub live_groups: u32,
    /// Active slots in the published continuum.
    pub continuum_size: usize,
    /// Slots the continuum storage can hold.
    pub capacity: usize,
    /// Earliest time a dead group becomes eligible again.
    pub next_rebuild: Option<Timestamp>,
}

impl ServerPool {
    /// Create a pool without groups and with an empty continuum.
    pub fn new(index: u32, name: impl Into<String>, auto_eject_hosts: bool) -> Self {
        Self {
            index,
            name: name.into(),
            groups: Vec::new(),
            auto_eject_hosts,
            continuum: ArcSwap::from_pointee(Continuum::empty()),
            live_groups: AtomicU32::new(0),
            next_rebuild: AtomicU64::new(0),
            build: Mutex::new(BuildState::default()),
        }
    }

    /// Append a group and return its id.
    ///
    /// Membership is fixed once the pool is shared; a membership change means
    /// building a new pool and rebuilding it.
    pub fn add_group(
        &mut self,
        name: impl Into<String>,
        servers: Vec<SocketAddr>,
        weight: NonZeroU32,
    ) -> GroupId {
        let id = GroupId(self.groups.len() as u32);
        self.groups
            .push(Arc::new(ServerGroup::new(id, name, servers, weight)));
        id
    }

    /// All groups in their stable order.
    pub fn groups(&self) -> &[SharedGroup] {
        &self.groups
    }

    /// Look up a group by id.
    pub fn group(&self, id: GroupId) -> Option<&SharedGroup> {
        self.groups.get(id.index())
    }

    /// Whether liveness and retry timestamps are honoured.
    pub fn auto_eject_hosts(&self) -> bool {
        self.auto_eject_hosts
    }

    /// Groups found live by the last rebuild.
    pub fn live_groups(&self) -> u32 {
        self.live_groups.load(Ordering::Acquire)
    }

    /// When the scheduler should next rebuild, if any group is dead.
    pub fn next_rebuild(&self) -> Option<Timestamp> {
        match self.next_rebuild.load(Ordering::Acquire) {
            0 => None,
            micros => Some(Timestamp::from_micros(micros)),
        }
    }

    /// Snapshot of the published continuum.
    pub fn continuum(&self) -> Arc<Continuum> {
        self.continuum.load_full()
    }

    /// Active slots in the published continuum.
    pub fn continuum_size(&self) -> usize {
        self.continuum.load().len()
    }

    /// Slots the continuum storage can hold.
    pub fn capacity(&self) -> usize {
        self.continuum.load().capacity()
    }

    /// Whether a continuum has ever been published.
    pub fn is_routable(&self) -> bool {
        !self.continuum.load().is_empty()
    }

    /// Resolve a request hash to a group using the published continuum.
    ///
    /// # Panics
    ///
    /// Panics if no rebuild has published a continuum yet.
    pub fn dispatch(&self, hash: u64) -> GroupId {
        self.continuum.load().dispatch(hash)
    }

    /// Diagnostics view of the pool.
    pub fn stats(&self) -> PoolStats {
        let continuum = self.continuum.load();
        PoolStats {
            name: self.name.clone(),
            groups: self.groups.len(),
            live_groups: self.live_groups(),
            continuum_size: continuum.len(),
            capacity: continuum.capacity(),
            next_rebuild: self.next_rebuild(),
        }
    }

    /// Atomically replace the published continuum, returning the old one.
    pub(crate) fn publish(&self, continuum: Arc<Continuum>) -> Arc<Continuum> {
        self.continuum.swap(continuum)
    }

    pub(crate) fn record_liveness(&self, live_groups: u32, next_rebuild: Option<Timestamp>) {
        self.live_groups.store(live_groups, Ordering::Release);
        self.next_rebuild.store(
            next_rebuild.map_or(0, Timestamp::as_micros),
            Ordering::Release,
        );
    }
}

/// A shared reference to a ServerPool.
pub type SharedPool = Arc<ServerPool>;
