//! Background scheduler that keeps each pool's continuum current.

use std::sync::Arc;
use std::time::Duration;

use sluice_core::{rebuild, Clock, RebuildReport, Timestamp};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::registry::PoolHandle;

/// Floor for the delay between two rebuilds.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Rebuilds one pool on a timer, on demand, and when a dead group's retry
/// window is due to elapse.
pub struct RebuildScheduler {
    handle: PoolHandle,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl RebuildScheduler {
    /// Create a scheduler that rebuilds at least every `interval`.
    pub fn new(handle: PoolHandle, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            handle,
            clock,
            interval,
        }
    }

    /// Run one rebuild and return how long to wait before the next.
    pub fn run_once(&self) -> Duration {
        let pool = &self.handle.pool;

        match rebuild(pool, self.clock.as_ref()) {
            Ok(report) => {
                log_report(&pool.name, &report);
                let now = self.clock.now().ok();
                next_delay(report.next_rebuild, now, self.interval)
            }
            Err(e) => {
                warn!(pool = %pool.name, error = %e, "continuum rebuild failed, keeping previous continuum");
                self.interval
            }
        }
    }

    /// Run the scheduler loop. Should be spawned as a background task.
    pub async fn run(self) {
        info!(pool = %self.handle.pool.name, interval = ?self.interval, "rebuild scheduler started");

        loop {
            let delay = self.run_once();

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = self.handle.rebuild.notified() => {
                    debug!(pool = %self.handle.pool.name, "rebuild requested");
                }
            }
        }
    }
}

/// Spawns a background Tokio task that rebuilds the pool until aborted.
pub fn spawn_scheduler(
    handle: PoolHandle,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(RebuildScheduler::new(handle, clock, interval).run())
}

/// Wait until the earliest retry time, but never longer than `interval`.
pub fn next_delay(hint: Option<Timestamp>, now: Option<Timestamp>, interval: Duration) -> Duration {
    match (hint, now) {
        (Some(hint), Some(now)) => now.until(hint).clamp(MIN_DELAY, interval.max(MIN_DELAY)),
        _ => interval.max(MIN_DELAY),
    }
}

fn log_report(pool: &str, report: &RebuildReport) {
    if report.live_groups == 0 {
        warn!(
            pool,
            total_groups = report.total_groups,
            continuum_size = report.continuum_size,
            "no live groups, routing against previous continuum"
        );
        return;
    }

    if report.reallocated {
        info!(pool, capacity = report.capacity, "continuum storage grown");
    }

    debug!(
        pool,
        live_groups = report.live_groups,
        total_groups = report.total_groups,
        continuum_size = report.continuum_size,
        "continuum rebuilt"
    );
}
