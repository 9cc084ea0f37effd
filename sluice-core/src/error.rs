//! Error types for continuum rebuilds.

use std::collections::TryReserveError;

/// The wall clock could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// The system clock reports a time before the UNIX epoch.
    #[error("system clock is set before the unix epoch")]
    BeforeEpoch(#[from] std::time::SystemTimeError),

    /// The clock was explicitly put into a failing state.
    #[error("time source unavailable: {reason}")]
    Unavailable {
        /// Why the time source could not be read.
        reason: String,
    },
}

/// Errors that abort a continuum rebuild.
///
/// A failed rebuild never touches the published continuum: dispatch keeps
/// resolving against the previous table until a later rebuild succeeds.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The current time could not be obtained.
    #[error("failed to read the current time: {0}")]
    Clock(#[from] ClockError),

    /// Backing storage for the continuum could not be grown.
    #[error("failed to allocate a continuum of {slots} slots")]
    Allocation {
        /// Number of slots that were requested.
        slots: usize,
        /// The underlying allocator failure.
        #[source]
        source: TryReserveError,
    },
}
