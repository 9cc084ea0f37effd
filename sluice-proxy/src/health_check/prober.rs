//! Background prober for active TCP health checks.
//!
//! Consecutive probe failures eject a group for the pool's retry timeout.
//! The prober only ever ejects; bringing a group back is left to the next
//! rebuild after its retry window elapses.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sluice_core::{Clock, ServerGroup, ServerPool};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::registry::PoolHandle;

/// When and for how long failing groups are ejected.
#[derive(Debug, Clone, Copy)]
pub struct EjectPolicy {
    /// Consecutive failures that trigger an ejection.
    pub failure_limit: u32,
    /// How long an ejected group stays dead.
    pub retry_timeout: Duration,
}

/// What a single probe result did to a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The group answered.
    Healthy,
    /// The group failed but stays in rotation.
    Failing {
        /// Consecutive failures so far.
        failures: u32,
    },
    /// The group was ejected by this failure.
    Ejected,
    /// The group failed while already waiting out its retry window.
    AlreadyDead,
}

/// Apply one probe result to a group's health state.
///
/// Returns `None` when the clock could not be read; the group is left as is.
pub fn apply_probe(
    pool: &ServerPool,
    group: &ServerGroup,
    healthy: bool,
    policy: EjectPolicy,
    clock: &dyn Clock,
) -> Option<ProbeOutcome> {
    if healthy {
        group.record_success();
        return Some(ProbeOutcome::Healthy);
    }

    let now = clock.now().ok()?;
    if !group.is_live_at(now) {
        return Some(ProbeOutcome::AlreadyDead);
    }

    let failures = group.record_failure();
    if !pool.auto_eject_hosts() || failures < policy.failure_limit {
        return Some(ProbeOutcome::Failing { failures });
    }

    group.eject_until(now.saturating_add(policy.retry_timeout));
    group.record_success();
    Some(ProbeOutcome::Ejected)
}

/// A group is healthy if any of its servers accepts a connection in time.
pub async fn probe_group(servers: &[SocketAddr], timeout: Duration) -> bool {
    for addr in servers {
        if let Ok(Ok(_stream)) = time::timeout(timeout, TcpStream::connect(addr)).await {
            return true;
        }
    }
    false
}

/// Spawns a background Tokio task that periodically probes every group of a
/// pool, ejects groups that keep failing, and requests a rebuild when it
/// does.
pub fn spawn_health_checker(
    handle: PoolHandle,
    clock: Arc<dyn Clock>,
    policy: EjectPolicy,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(interval);

        // Prevent immediately ticking when spawned
        interval.tick().await;

        loop {
            interval.tick().await;

            let pool = &handle.pool;
            let mut ejected = false;
            for group in pool.groups() {
                let healthy = probe_group(&group.servers, timeout).await;

                match apply_probe(pool, group, healthy, policy, clock.as_ref()) {
                    Some(ProbeOutcome::Ejected) => {
                        info!(
                            pool = %pool.name,
                            group = %group.name,
                            retry_in = ?policy.retry_timeout,
                            "group ejected after repeated probe failures"
                        );
                        ejected = true;
                    }
                    Some(ProbeOutcome::Failing { failures }) => {
                        debug!(pool = %pool.name, group = %group.name, failures, "probe failed");
                    }
                    Some(ProbeOutcome::Healthy | ProbeOutcome::AlreadyDead) => {}
                    None => {
                        warn!(pool = %pool.name, "clock unavailable, skipping probe result");
                    }
                }
            }

            if ejected {
                handle.request_rebuild();
            }
        }
    })
}
