//! presence-core: Liveness model, shared types, configuration, and error handling for netpresence.
//!
//! This crate holds everything that does not touch the network:
//! - Device identifiers, expiry units, neighbor rows and contact events
//! - The per-device liveness model (`TrackedDevice`)
//! - Property change events and the property schema exposed to hosts
//! - The seams a host framework implements (`DeviceProvider`, `PropertySink`)
//! - Configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod liveness;
pub mod types;

pub use config::MonitorConfig;
pub use error::PresenceError;
pub use events::{Property, PropertyChange, PropertyValue};
pub use host::{DeviceProvider, PropertySink};
pub use liveness::TrackedDevice;
pub use types::{ContactEvent, ExpiryUnit, Identifier, NeighborEntry};
