//! presence-monitor: Local network presence tracker.
//!
//! Sweeps the host's IPv4 subnets with ping, reads the neighbor table to
//! discover devices, and keeps one long-running arping per tracked device
//! to decide whether it is still present.

pub mod error;
pub mod neighbor;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod subnet;
