//! Continuum rebuilds.
//!
//! A rebuild walks the pool's groups once, decides which are live at the
//! current time, and publishes a continuum holding `weight` slots per live
//! group in group order. The published table is swapped in whole, so
//! concurrent dispatches see either the previous table or the new one.
//!
//! Storage is double-buffered. The continuum retired by a publish is kept as a
//! spare and rewritten by the next rebuild once no reader still holds it.
//! Capacity only grows: when live weight exceeds it, a new buffer of
//! `total_weight + CONTINUUM_ADDITION` slots is allocated.

use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::{Clock, Timestamp};
use crate::domain::group::{GroupId, SharedGroup};
use crate::domain::pool::ServerPool;
use crate::error::BuildError;
use crate::load_balancer::continuum::Continuum;

/// Extra slots allocated on growth to absorb small weight fluctuations.
pub const CONTINUUM_ADDITION: usize = 10;

/// Outcome of a successful rebuild, consumed by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    /// Groups that were live at rebuild time.
    pub live_groups: u32,
    /// Groups configured in the pool.
    pub total_groups: usize,
    /// Active slots in the published continuum.
    pub continuum_size: usize,
    /// Slots the continuum storage can hold.
    pub capacity: usize,
    /// Earliest retry time among dead groups.
    pub next_rebuild: Option<Timestamp>,
    /// Whether a new continuum was published. False when no group was live.
    pub published: bool,
    /// Whether capacity grew during this rebuild.
    pub reallocated: bool,
    /// Groups whose elapsed retry window was cleared by this rebuild.
    pub revived: Vec<GroupId>,
}

/// Rebuild and publish the pool's continuum.
///
/// With `auto_eject_hosts` disabled every group is live. Otherwise a group is
/// live when its retry time is not in the future. A live group whose retry
/// time has elapsed is revived: its retry timestamp is cleared after the new
/// continuum is published, unless the health subsystem re-ejected it first.
///
/// When no group is live the previous continuum stays published and the
/// rebuild still succeeds; callers check [`RebuildReport::live_groups`].
/// On error nothing is published and no group is revived.
pub fn rebuild<C: Clock + ?Sized>(
    pool: &ServerPool,
    clock: &C,
) -> Result<RebuildReport, BuildError> {
    let mut state = pool.build.lock();
    let now = clock.now()?;

    let total_groups = pool.groups().len();
    let mut live: Vec<&SharedGroup> = Vec::with_capacity(total_groups);
    let mut revivable: Vec<(&SharedGroup, Timestamp)> = Vec::new();
    let mut total_weight = 0usize;
    let mut next_rebuild: Option<Timestamp> = None;

    for group in pool.groups() {
        if pool.auto_eject_hosts() {
            match group.next_retry() {
                Some(retry) if retry > now => {
                    next_rebuild = Some(next_rebuild.map_or(retry, |hint| hint.min(retry)));
                    continue;
                }
                Some(retry) => revivable.push((group, retry)),
                None => {}
            }
        }
        total_weight += group.weight() as usize;
        live.push(group);
    }

    let live_groups = live.len() as u32;

    if live.is_empty() {
        pool.record_liveness(0, next_rebuild);
        debug!(
            pool = %pool.name,
            index = pool.index,
            total_groups,
            "no live groups, keeping previous continuum"
        );
        return Ok(RebuildReport {
            live_groups,
            total_groups,
            continuum_size: pool.continuum_size(),
            capacity: state.capacity,
            next_rebuild,
            published: false,
            reallocated: false,
            revived: Vec::new(),
        });
    }

    let capacity = if total_weight > state.capacity {
        total_weight + CONTINUUM_ADDITION
    } else {
        state.capacity
    };
    let reallocated = capacity > state.capacity;

    let mut next = match state.spare.take().map(Arc::try_unwrap) {
        Some(Ok(spare)) if spare.capacity() == capacity => spare,
        _ => Continuum::with_capacity(capacity)?,
    };
    next.fill(live.iter().copied());
    let continuum_size = next.len();

    state.spare = Some(pool.publish(Arc::new(next)));
    state.capacity = capacity;
    pool.record_liveness(live_groups, next_rebuild);

    let revived: Vec<GroupId> = revivable
        .into_iter()
        .filter(|(group, observed)| group.revive(*observed))
        .map(|(group, _)| group.id)
        .collect();
    for id in &revived {
        if let Some(group) = pool.group(*id) {
            info!(pool = %pool.name, group = %group.name, "retry window elapsed, group back in rotation");
        }
    }

    debug!(
        pool = %pool.name,
        index = pool.index,
        live_groups,
        total_groups,
        continuum_size,
        capacity,
        reallocated,
        "updated continuum"
    );

    Ok(RebuildReport {
        live_groups,
        total_groups,
        continuum_size,
        capacity,
        next_rebuild,
        published: true,
        reallocated,
        revived,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use proptest::prelude::*;
    use std::num::NonZeroU32;
    use std::time::Duration;

    const NOW: Timestamp = Timestamp::from_micros(1_000_000);

    fn pool(weights: &[u32], auto_eject_hosts: bool) -> ServerPool {
        let mut pool = ServerPool::new(0, "test", auto_eject_hosts);
        for (i, w) in weights.iter().enumerate() {
            pool.add_group(format!("g{i}"), Vec::new(), NonZeroU32::new(*w).unwrap());
        }
        pool
    }

    fn owners(pool: &ServerPool) -> Vec<u32> {
        pool.continuum().slots().iter().map(|s| s.group.0).collect()
    }

    fn later(micros: u64) -> Timestamp {
        NOW.saturating_add(Duration::from_micros(micros))
    }

    #[test]
    fn test_equal_weights_without_ejection() {
        let pool = pool(&[1, 1, 1], false);
        let clock = ManualClock::new(NOW);
        let report = rebuild(&pool, &clock).unwrap();

        assert!(report.published);
        assert_eq!(report.continuum_size, 3);
        assert_eq!(owners(&pool), vec![0, 1, 2]);
        assert_eq!(pool.dispatch(0), GroupId(0));
        assert_eq!(pool.dispatch(1), GroupId(1));
        assert_eq!(pool.dispatch(3), GroupId(0));
    }

    #[test]
    fn test_weighted_slots_follow_build_order() {
        let pool = pool(&[2, 1], true);
        let clock = ManualClock::new(NOW);
        rebuild(&pool, &clock).unwrap();

        assert_eq!(pool.continuum_size(), 3);
        let picks: Vec<GroupId> = (0..3).map(|h| pool.dispatch(h)).collect();
        assert_eq!(picks, vec![GroupId(0), GroupId(0), GroupId(1)]);
    }

    #[test]
    fn test_dead_group_excluded_and_hinted() {
        let pool = pool(&[3, 2], true);
        pool.groups()[1].eject_until(later(100));
        let clock = ManualClock::new(NOW);

        let report = rebuild(&pool, &clock).unwrap();
        assert_eq!(report.live_groups, 1);
        assert_eq!(report.continuum_size, 3);
        assert_eq!(report.next_rebuild, Some(later(100)));
        assert_eq!(pool.next_rebuild(), Some(later(100)));
        assert_eq!(pool.live_groups(), 1);
        assert_eq!(owners(&pool), vec![0, 0, 0]);
        assert!(report.revived.is_empty());
    }

    #[test]
    fn test_hint_is_earliest_retry() {
        let pool = pool(&[1, 1, 1, 1], true);
        pool.groups()[0].eject_until(later(500));
        pool.groups()[2].eject_until(later(200));
        pool.groups()[3].eject_until(later(900));
        let clock = ManualClock::new(NOW);

        let report = rebuild(&pool, &clock).unwrap();
        assert_eq!(report.next_rebuild, Some(later(200)));
        assert_eq!(owners(&pool), vec![1]);
    }

    #[test]
    fn test_elapsed_retry_window_revives_group() {
        let pool = pool(&[1, 2], true);
        pool.groups()[1].eject_until(later(100));
        let clock = ManualClock::new(NOW);
        rebuild(&pool, &clock).unwrap();
        assert_eq!(owners(&pool), vec![0]);

        clock.set(later(100));
        let report = rebuild(&pool, &clock).unwrap();
        assert_eq!(report.revived, vec![GroupId(1)]);
        assert_eq!(report.next_rebuild, None);
        assert_eq!(pool.groups()[1].next_retry(), None);
        assert_eq!(owners(&pool), vec![0, 1, 1]);
    }

    #[test]
    fn test_retry_timestamps_ignored_without_ejection() {
        let pool = pool(&[1, 1], false);
        pool.groups()[0].eject_until(later(100));
        let clock = ManualClock::new(NOW);

        let report = rebuild(&pool, &clock).unwrap();
        assert_eq!(report.live_groups, 2);
        assert_eq!(report.next_rebuild, None);
        assert!(report.revived.is_empty());
        assert_eq!(pool.groups()[0].next_retry(), Some(later(100)));
    }

    #[test]
    fn test_all_dead_keeps_previous_continuum() {
        let pool = pool(&[2, 3], true);
        let clock = ManualClock::new(NOW);
        rebuild(&pool, &clock).unwrap();
        let before = owners(&pool);
        let capacity = pool.capacity();

        for group in pool.groups() {
            group.eject_until(later(50));
        }
        let report = rebuild(&pool, &clock).unwrap();

        assert!(!report.published);
        assert_eq!(report.live_groups, 0);
        assert_eq!(report.next_rebuild, Some(later(50)));
        assert_eq!(pool.live_groups(), 0);
        assert_eq!(owners(&pool), before);
        assert_eq!(pool.capacity(), capacity);
    }

    #[test]
    fn test_all_dead_before_first_build_stays_unroutable() {
        let pool = pool(&[1], true);
        pool.groups()[0].eject_until(later(10));
        let clock = ManualClock::new(NOW);

        let report = rebuild(&pool, &clock).unwrap();
        assert!(!report.published);
        assert!(!pool.is_routable());
    }

    #[test]
    fn test_clock_failure_mutates_nothing() {
        let pool = pool(&[1, 1], true);
        let clock = ManualClock::new(NOW);
        rebuild(&pool, &clock).unwrap();
        let before = owners(&pool);

        pool.groups()[0].eject_until(later(10));
        clock.set(later(20));
        clock.set_failing(true);

        let err = rebuild(&pool, &clock).unwrap_err();
        assert!(matches!(err, BuildError::Clock(_)));
        assert_eq!(owners(&pool), before);
        assert_eq!(pool.live_groups(), 2);
        assert_eq!(pool.groups()[0].next_retry(), Some(later(10)));
    }

    #[test]
    fn test_capacity_growth_uses_headroom() {
        let pool = pool(&[5, 7, 4], true);
        pool.groups()[1].eject_until(later(10));
        pool.groups()[2].eject_until(later(20));
        let clock = ManualClock::new(NOW);

        let report = rebuild(&pool, &clock).unwrap();
        assert_eq!(report.continuum_size, 5);
        assert_eq!(report.capacity, 15);
        assert!(report.reallocated);

        clock.set(later(10));
        let report = rebuild(&pool, &clock).unwrap();
        assert_eq!(report.continuum_size, 12);
        assert_eq!(report.capacity, 15);
        assert!(!report.reallocated);

        clock.set(later(20));
        let report = rebuild(&pool, &clock).unwrap();
        assert_eq!(report.continuum_size, 16);
        assert_eq!(report.capacity, 26);
        assert!(report.reallocated);
        assert_eq!(pool.capacity(), 26);
    }

    #[test]
    fn test_retired_buffer_reused_once_released() {
        let pool = pool(&[2, 2], false);
        let clock = ManualClock::new(NOW);

        rebuild(&pool, &clock).unwrap();
        let first = pool.continuum().slots().as_ptr() as usize;
        rebuild(&pool, &clock).unwrap();
        rebuild(&pool, &clock).unwrap();
        let third = pool.continuum().slots().as_ptr() as usize;

        assert_eq!(first, third);
    }

    #[test]
    fn test_held_snapshot_is_never_rewritten() {
        let pool = pool(&[1, 1], true);
        let clock = ManualClock::new(NOW);
        rebuild(&pool, &clock).unwrap();
        let held = pool.continuum();

        pool.groups()[0].eject_until(later(10));
        rebuild(&pool, &clock).unwrap();
        rebuild(&pool, &clock).unwrap();
        rebuild(&pool, &clock).unwrap();

        let held_owners: Vec<u32> = held.slots().iter().map(|s| s.group.0).collect();
        assert_eq!(held_owners, vec![0, 1]);
        assert_eq!(owners(&pool), vec![1]);
    }

    proptest! {
        #[test]
        fn every_group_gets_weight_slots(weights in prop::collection::vec(1u32..20, 1..16)) {
            let pool = pool(&weights, false);
            let clock = ManualClock::new(NOW);
            let report = rebuild(&pool, &clock).unwrap();

            let total: u32 = weights.iter().sum();
            prop_assert_eq!(report.continuum_size, total as usize);
            let slots = owners(&pool);
            for (i, w) in weights.iter().enumerate() {
                let count = slots.iter().filter(|g| **g == i as u32).count();
                prop_assert_eq!(count, *w as usize);
            }
        }

        #[test]
        fn ejection_splits_live_and_dead(
            groups in prop::collection::vec((1u32..10, 0u64..3, 0u64..1_000), 1..12),
        ) {
            let weights: Vec<u32> = groups.iter().map(|g| g.0).collect();
            let pool = pool(&weights, true);
            // kind 0: never ejected, 1: retry elapsed, 2: retry in the future
            for (group, (_, kind, offset)) in pool.groups().iter().zip(&groups) {
                match kind {
                    1 => group.eject_until(Timestamp::from_micros(NOW.as_micros() - offset)),
                    2 => group.eject_until(later(offset + 1)),
                    _ => {}
                }
            }
            let clock = ManualClock::new(NOW);
            let report = rebuild(&pool, &clock).unwrap();

            let dead: Vec<usize> = (0..groups.len()).filter(|i| groups[*i].1 == 2).collect();
            let expected_hint = dead.iter().map(|i| later(groups[*i].2 + 1)).min();
            prop_assert_eq!(report.next_rebuild, expected_hint);
            prop_assert_eq!(report.live_groups as usize, groups.len() - dead.len());

            let slots = owners(&pool);
            for (i, group) in pool.groups().iter().enumerate() {
                let count = slots.iter().filter(|g| **g == i as u32).count();
                if dead.contains(&i) {
                    prop_assert_eq!(count, 0);
                    prop_assert!(group.next_retry().is_some());
                } else if report.published {
                    prop_assert_eq!(count, weights[i] as usize);
                    prop_assert_eq!(group.next_retry(), None);
                }
            }
        }

        #[test]
        fn rebuild_is_idempotent(weights in prop::collection::vec(1u32..10, 1..10), dead_mask in any::<u16>()) {
            let pool = pool(&weights, true);
            for (i, group) in pool.groups().iter().enumerate() {
                if dead_mask & (1 << i) != 0 {
                    group.eject_until(later(1_000));
                }
            }
            let clock = ManualClock::new(NOW);
            let first = rebuild(&pool, &clock).unwrap();
            let first_slots = owners(&pool);
            let second = rebuild(&pool, &clock).unwrap();

            prop_assert_eq!(first.continuum_size, second.continuum_size);
            prop_assert_eq!(first_slots, owners(&pool));
        }

        #[test]
        fn capacity_never_shrinks(
            weights in prop::collection::vec(1u32..30, 1..8),
            masks in prop::collection::vec(any::<u8>(), 1..20),
        ) {
            let pool = pool(&weights, true);
            let clock = ManualClock::new(NOW);
            let mut last_capacity = 0;

            for mask in masks {
                for (i, group) in pool.groups().iter().enumerate() {
                    if mask & (1 << i) != 0 {
                        group.eject_until(later(1));
                    } else {
                        group.eject_until(Timestamp::from_micros(1));
                    }
                }
                let report = rebuild(&pool, &clock).unwrap();
                prop_assert!(report.capacity >= last_capacity);
                prop_assert!(pool.capacity() >= last_capacity);
                prop_assert!(pool.continuum_size() <= pool.capacity());
                last_capacity = report.capacity;
            }
        }
    }
}
