//! Sluice Core functionality.
//!
//! This crate contains the server group and pool models, the weighted modulo
//! continuum, and the rebuild and dispatch primitives that spread requests
//! across the live groups of a pool.
//!
//! The request path calls [`ServerPool::dispatch`] with a precomputed hash and
//! never blocks. A single control path per pool calls [`rebuild`] whenever
//! group liveness, weight or membership may have changed.

pub mod clock;
pub mod domain;
pub mod error;
pub mod load_balancer;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use domain::group::{GroupId, ServerGroup, SharedGroup};
pub use domain::pool::{PoolStats, ServerPool, SharedPool};
pub use error::{BuildError, ClockError};
pub use load_balancer::builder::{rebuild, RebuildReport, CONTINUUM_ADDITION};
pub use load_balancer::continuum::{Continuum, Slot};
pub use load_balancer::dispatcher::dispatch;
