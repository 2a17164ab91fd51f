//! Seams implemented by the host framework that owns device objects.

use crate::error::Result;
use crate::events::PropertyChange;
use crate::liveness::TrackedDevice;
use crate::types::Identifier;

/// Source of fully resolved device objects.
pub trait DeviceProvider {
    /// The resolved device stored under `id`, if the host has one.
    fn device(&self, id: &Identifier) -> Option<TrackedDevice>;

    /// Register a newly discovered device, or save the settings of a known one.
    fn register(&mut self, device: &TrackedDevice) -> Result<()>;
}

/// Receives every property write that changed a value.
pub trait PropertySink {
    fn publish(&mut self, change: PropertyChange);

    fn publish_all(&mut self, changes: Vec<PropertyChange>) {
        for change in changes {
            self.publish(change);
        }
    }
}

/// Collects changes in memory; useful for hosts that batch notifications.
impl PropertySink for Vec<PropertyChange> {
    fn publish(&mut self, change: PropertyChange) {
        self.push(change);
    }
}
