//! Wall-clock timestamps used for retry windows and rebuild hints.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::ClockError;

/// Microseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Build a timestamp from raw microseconds since the epoch.
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Raw microseconds since the epoch.
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// The timestamp `delta` later, saturating at the end of the range.
    pub fn saturating_add(self, delta: Duration) -> Self {
        let micros = u64::try_from(delta.as_micros()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(micros))
    }

    /// Time remaining until `later`, or zero if it has already passed.
    pub fn until(self, later: Timestamp) -> Duration {
        Duration::from_micros(later.0.saturating_sub(self.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// A source of the current time.
///
/// Rebuilds read the clock exactly once; a failure aborts the rebuild before
/// any state is touched.
pub trait Clock: Send + Sync {
    /// Read the current time.
    fn now(&self) -> Result<Timestamp, ClockError>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<Timestamp, ClockError> {
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH)?;
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        Ok(Timestamp(micros))
    }
}

/// A manually driven clock for tests and simulations.
///
/// Can be switched into a failing state to exercise time source errors.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
    failing: AtomicBool,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            micros: AtomicU64::new(now.0),
            failing: AtomicBool::new(false),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: Timestamp) {
        self.micros.store(now.0, Ordering::Release);
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: Duration) {
        let micros = u64::try_from(delta.as_micros()).unwrap_or(u64::MAX);
        self.micros.fetch_add(micros, Ordering::AcqRel);
    }

    /// Make subsequent reads fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Result<Timestamp, ClockError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(ClockError::Unavailable {
                reason: "manual clock set to fail".to_string(),
            });
        }
        Ok(Timestamp(self.micros.load(Ordering::Acquire)))
    }
}
