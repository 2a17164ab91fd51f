//! Core domain types shared by the liveness model and the monitor.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PresenceError;

/// Smallest accepted expiry threshold.
pub const EXPIRY_MIN: u32 = 1;

/// Largest accepted expiry threshold (31 days worth of seconds).
pub const EXPIRY_MAX: u32 = 60 * 60 * 24 * 31;

// ── Identifier ────────────────────────────────────────────────────

/// Stable device identifier: the discovered name plus the installation suffix.
///
/// Built once from a name and carried around; the name is never recovered by
/// string surgery at call sites.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    id: String,
    name: String,
}

impl Identifier {
    pub fn from_name(name: &str, suffix: &str) -> Self {
        Self {
            id: format!("{name}{suffix}"),
            name: name.to_string(),
        }
    }

    /// Parse a raw identifier handed over by a host. Identifiers that do not
    /// carry `suffix`, or carry nothing but the suffix, belong to someone else.
    pub fn parse(raw: &str, suffix: &str) -> Result<Self, PresenceError> {
        match raw.strip_suffix(suffix) {
            Some(name) if !name.is_empty() && !suffix.is_empty() => {
                Ok(Self::from_name(name, suffix))
            }
            _ => Err(PresenceError::ForeignIdentifier {
                id: raw.to_string(),
            }),
        }
    }

    /// The device name or address this identifier was derived from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

// ── Expiry unit ───────────────────────────────────────────────────

/// Granularity of a device's expiry threshold.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryUnit {
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

/// Seconds per unit and the threshold a unit snaps to when selected.
struct UnitLookup {
    factor: i64,
    default_threshold: u32,
}

const fn lookup(unit: ExpiryUnit) -> UnitLookup {
    match unit {
        ExpiryUnit::Seconds => UnitLookup {
            factor: 1,
            default_threshold: 600,
        },
        ExpiryUnit::Minutes => UnitLookup {
            factor: 60,
            default_threshold: 10,
        },
        ExpiryUnit::Hours => UnitLookup {
            factor: 60 * 60,
            default_threshold: 1,
        },
        ExpiryUnit::Days => UnitLookup {
            factor: 60 * 60 * 24,
            default_threshold: 1,
        },
    }
}

impl ExpiryUnit {
    pub const ALL: [ExpiryUnit; 4] = [Self::Seconds, Self::Minutes, Self::Hours, Self::Days];

    /// Number of seconds in one unit.
    pub const fn factor(self) -> i64 {
        lookup(self).factor
    }

    /// Threshold applied whenever this unit is selected.
    pub const fn default_threshold(self) -> u32 {
        lookup(self).default_threshold
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
        }
    }
}

impl fmt::Display for ExpiryUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpiryUnit {
    type Err = PresenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|u| u.as_str() == s)
            .ok_or_else(|| PresenceError::UnknownUnit(s.to_string()))
    }
}

// ── Discovery & contact ───────────────────────────────────────────

/// One usable row of the system neighbor (ARP) table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NeighborEntry {
    /// Device name derived from the address column.
    pub name: String,
    /// The host column as printed: a hostname, or the dotted quad when the
    /// address has no reverse name.
    pub address: String,
    /// IPv4 address of the entry, when the table printed one.
    pub ip: Option<Ipv4Addr>,
    pub link_address: String,
    pub interface: String,
}

impl NeighborEntry {
    /// Derive the device name from an address column: the first DNS label
    /// of a hostname, or the whole dotted quad for a bare IPv4 address.
    pub fn name_for(address: &str) -> String {
        if address.parse::<Ipv4Addr>().is_ok() {
            return address.to_string();
        }
        address.split('.').next().unwrap_or(address).to_string()
    }

    /// Whether `name` refers to this entry by derived name, host column or IP.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name
            || self.address == name
            || self.ip.is_some_and(|ip| name.parse::<Ipv4Addr>() == Ok(ip))
    }
}

/// A liveness reply observed by an active probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactEvent {
    pub device: Identifier,
    pub timestamp: DateTime<Utc>,
    /// Responding address, when the reply carried one.
    pub source_address: Option<String>,
}
