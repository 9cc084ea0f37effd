//! Domain models for server groups and the pools that contain them.

pub mod group;
pub mod pool;
