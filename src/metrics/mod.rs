//! Metrics export.
//!
//! Scan counters can be pushed to a Prometheus Push Gateway once a scan ends.
//!
//! # Submodules
//!
//! - `prom` - Prometheus metrics integration

pub mod prom;
