//! Property change events and the property schema of a tracked device.
//!
//! Every write to a device property that changes its value produces a
//! `PropertyChange`, which the monitor hands to the host's `PropertySink`.

use serde::{Deserialize, Serialize};

use crate::types::{ExpiryUnit, Identifier, EXPIRY_MAX, EXPIRY_MIN};

/// The properties a tracked device exposes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Property {
    Present,
    Seconds,
    Minutes,
    Hours,
    Days,
    Address,
    Expiry,
    ExpiryUnit,
}

impl Property {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Address => "address",
            Self::Expiry => "expiry",
            Self::ExpiryUnit => "expiryUnit",
        }
    }

    pub fn descriptor(self) -> &'static PropertyDescriptor {
        // PROPERTIES is declared in enum order.
        &PROPERTIES[self as usize]
    }
}

/// A property value as seen by observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Text(String),
    Null,
}

/// A single observed property write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyChange {
    pub device: Identifier,
    pub property: Property,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Integer,
    String,
}

/// Static description of a property, for hosts that render a schema.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub property: Property,
    pub title: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    pub read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<u32>,
    #[serde(rename = "enum", skip_serializing_if = "no_choices")]
    pub choices: &'static [&'static str],
}

fn no_choices(choices: &&'static [&'static str]) -> bool {
    choices.is_empty()
}

const UNIT_NAMES: [&str; 4] = [
    ExpiryUnit::Seconds.as_str(),
    ExpiryUnit::Minutes.as_str(),
    ExpiryUnit::Hours.as_str(),
    ExpiryUnit::Days.as_str(),
];

const fn age(property: Property, title: &'static str, unit: &'static str) -> PropertyDescriptor {
    PropertyDescriptor {
        property,
        title,
        description: "Time since the device was last contactable on the network",
        value_type: ValueType::Integer,
        unit: Some(unit),
        read_only: true,
        minimum: None,
        maximum: None,
        choices: &[],
    }
}

pub static PROPERTIES: [PropertyDescriptor; 8] = [
    PropertyDescriptor {
        property: Property::Present,
        title: "Present",
        description: "The address is responding",
        value_type: ValueType::Boolean,
        unit: None,
        read_only: true,
        minimum: None,
        maximum: None,
        choices: &[],
    },
    age(Property::Seconds, "Seconds since last seen", "seconds"),
    age(Property::Minutes, "Minutes since last seen", "minutes"),
    age(Property::Hours, "Hours since last seen", "hours"),
    age(Property::Days, "Days since last seen", "days"),
    PropertyDescriptor {
        property: Property::Address,
        title: "IP address",
        description: "The IP address of the device",
        value_type: ValueType::String,
        unit: None,
        read_only: true,
        minimum: None,
        maximum: None,
        choices: &[],
    },
    PropertyDescriptor {
        property: Property::Expiry,
        title: "Units to expiry",
        description: "The number of units after which the device is no longer considered present",
        value_type: ValueType::Integer,
        unit: None,
        read_only: false,
        minimum: Some(EXPIRY_MIN),
        maximum: Some(EXPIRY_MAX),
        choices: &[],
    },
    PropertyDescriptor {
        property: Property::ExpiryUnit,
        title: "Units of expiry",
        description: "The units of the expiry setting",
        value_type: ValueType::String,
        unit: None,
        read_only: false,
        minimum: None,
        maximum: None,
        choices: &UNIT_NAMES,
    },
];
