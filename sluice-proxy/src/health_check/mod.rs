//! Active health checking of server groups.

pub mod prober;
