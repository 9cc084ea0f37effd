//! Weighted modulo distribution: the continuum, its builder and the dispatcher.

pub mod builder;
pub mod continuum;
pub mod dispatcher;
