//! Per-device liveness model.
//!
//! A `TrackedDevice` turns "time since last contact" into a present/absent
//! flag under a configurable expiry threshold and unit. The age fields and
//! the present flag are derived state: only `record_contact` and `refresh`
//! write them. Every mutating method returns the property changes it made,
//! so the caller can notify observers without re-reading the device.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{PresenceError, Result};
use crate::events::{Property, PropertyChange, PropertyValue};
use crate::types::{ExpiryUnit, Identifier, EXPIRY_MAX, EXPIRY_MIN};

/// Age value reported before the first contact.
pub const NEVER_SEEN: i64 = -1;

/// Time since last contact, expressed in each unit.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Age {
    pub seconds: i64,
    pub minutes: i64,
    pub hours: i64,
    pub days: i64,
}

impl Age {
    const NEVER: Age = Age::uniform(NEVER_SEEN);
    const ZERO: Age = Age::uniform(0);

    const fn uniform(v: i64) -> Self {
        Self {
            seconds: v,
            minutes: v,
            hours: v,
            days: v,
        }
    }

    fn from_seconds(seconds: i64) -> Self {
        Self {
            seconds,
            minutes: seconds.div_euclid(ExpiryUnit::Minutes.factor()),
            hours: seconds.div_euclid(ExpiryUnit::Hours.factor()),
            days: seconds.div_euclid(ExpiryUnit::Days.factor()),
        }
    }
}

/// A fully resolved device under continuous monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedDevice {
    pub id: Identifier,
    pub title: String,
    pub description: String,
    pub link_address: String,
    pub interface: String,
    last_contact: Option<DateTime<Utc>>,
    present: bool,
    age: Age,
    expiry: u32,
    expiry_unit: ExpiryUnit,
    address: Option<String>,
}

impl TrackedDevice {
    /// Semantic type tag hosts use to render the device.
    pub const KIND: &'static str = "BinarySensor";

    pub fn new(id: Identifier, link_address: &str, interface: &str) -> Self {
        let title = id.name().to_string();
        Self {
            description: format!("Network Presence of {title}"),
            title,
            id,
            link_address: link_address.to_string(),
            interface: interface.to_string(),
            last_contact: None,
            present: false,
            age: Age::NEVER,
            expiry: ExpiryUnit::Seconds.default_threshold(),
            expiry_unit: ExpiryUnit::Seconds,
            address: None,
        }
    }

    /// Rebuild a device from saved settings. The unit is applied first so a
    /// stored custom threshold is not replaced by the unit's default.
    pub fn restore(
        id: Identifier,
        link_address: &str,
        interface: &str,
        expiry: u32,
        expiry_unit: ExpiryUnit,
    ) -> Result<Self> {
        let mut device = Self::new(id, link_address, interface);
        device.change_expiry_unit(expiry_unit);
        device.set_expiry(expiry)?;
        Ok(device)
    }

    pub fn last_contact(&self) -> Option<DateTime<Utc>> {
        self.last_contact
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn age(&self) -> Age {
        self.age
    }

    pub fn expiry(&self) -> u32 {
        self.expiry
    }

    pub fn expiry_unit(&self) -> ExpiryUnit {
        self.expiry_unit
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Mark the device as just seen.
    pub fn record_contact(&mut self, at: DateTime<Utc>) -> Vec<PropertyChange> {
        self.track(|d| {
            d.last_contact = Some(at);
            d.age = Age::ZERO;
            d.present = true;
        })
    }

    /// Recompute age and presence from the last contact. No-op before the
    /// first contact.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> Vec<PropertyChange> {
        let Some(last) = self.last_contact else {
            return Vec::new();
        };
        self.track(|d| {
            let seconds = (now - last).num_milliseconds().div_euclid(1000);
            d.age = Age::from_seconds(seconds);
            d.present = seconds.div_euclid(d.expiry_unit.factor()) < i64::from(d.expiry);
        })
    }

    /// Switch the expiry unit. The threshold snaps to the unit's default;
    /// the previous threshold is not converted.
    pub fn change_expiry_unit(&mut self, unit: ExpiryUnit) -> Vec<PropertyChange> {
        self.track(|d| {
            d.expiry_unit = unit;
            d.expiry = unit.default_threshold();
        })
    }

    /// Set the expiry threshold, expressed in the current unit.
    pub fn set_expiry(&mut self, expiry: u32) -> Result<Vec<PropertyChange>> {
        if !(EXPIRY_MIN..=EXPIRY_MAX).contains(&expiry) {
            return Err(PresenceError::ExpiryOutOfRange { value: expiry });
        }
        Ok(self.track(|d| d.expiry = expiry))
    }

    /// Remember the address the device last answered from.
    pub fn set_address(&mut self, address: &str) -> Vec<PropertyChange> {
        self.track(|d| d.address = Some(address.to_string()))
    }

    /// Every property with its current value, in schema order.
    pub fn properties(&self) -> Vec<PropertyChange> {
        self.values()
            .into_iter()
            .map(|(property, value)| self.change(property, value))
            .collect()
    }

    fn values(&self) -> [(Property, PropertyValue); 8] {
        [
            (Property::Present, PropertyValue::Bool(self.present)),
            (Property::Seconds, PropertyValue::Integer(self.age.seconds)),
            (Property::Minutes, PropertyValue::Integer(self.age.minutes)),
            (Property::Hours, PropertyValue::Integer(self.age.hours)),
            (Property::Days, PropertyValue::Integer(self.age.days)),
            (
                Property::Address,
                self.address
                    .clone()
                    .map_or(PropertyValue::Null, PropertyValue::Text),
            ),
            (Property::Expiry, PropertyValue::Integer(i64::from(self.expiry))),
            (
                Property::ExpiryUnit,
                PropertyValue::Text(self.expiry_unit.to_string()),
            ),
        ]
    }

    fn change(&self, property: Property, value: PropertyValue) -> PropertyChange {
        PropertyChange {
            device: self.id.clone(),
            property,
            value,
        }
    }

    /// Apply `update` and report the properties whose value changed.
    fn track(&mut self, update: impl FnOnce(&mut Self)) -> Vec<PropertyChange> {
        let before = self.values();
        update(self);
        let after = self.values();
        before
            .into_iter()
            .zip(after)
            .filter(|((_, old), (_, new))| old != new)
            .map(|(_, (property, value))| self.change(property, value))
            .collect()
    }
}
