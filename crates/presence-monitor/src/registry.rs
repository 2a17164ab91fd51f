//! Device registry.
//!
//! Maps identifiers to either a pending name (a device of interest whose
//! network details are not yet known) or a resolved `TrackedDevice`. An
//! entry moves from pending to resolved at most once and never goes back.
//! All callers go through this API; nothing else touches the map.

use std::collections::{HashMap, HashSet};

use presence_core::{DeviceProvider, Identifier, NeighborEntry, TrackedDevice};

/// Outcome of [`Registry::resolve`].
#[derive(Debug)]
pub enum Resolution<'a> {
    /// Already resolved.
    Tracked(&'a mut TrackedDevice),
    /// Resolved by this call; the caller should start active probing.
    Promoted(&'a mut TrackedDevice),
    /// Still pending; the caller should hunt for it on the network.
    Hunting,
    /// Not a device of interest.
    Unknown,
}

impl<'a> Resolution<'a> {
    pub fn device(self) -> Option<&'a mut TrackedDevice> {
        match self {
            Self::Tracked(d) | Self::Promoted(d) => Some(d),
            Self::Hunting | Self::Unknown => None,
        }
    }
}

/// Outcome of [`Registry::upsert_from_discovery`].
#[derive(Debug)]
pub struct Upsert<'a> {
    /// True when this discovery resolved the device for the first time.
    pub created: bool,
    pub device: &'a mut TrackedDevice,
}

/// An identifier lives in exactly one of `pending` and `devices`.
pub struct Registry {
    suffix: String,
    pending: HashSet<Identifier>,
    devices: HashMap<Identifier, TrackedDevice>,
}

impl Registry {
    pub fn new(suffix: &str) -> Self {
        Self {
            suffix: suffix.to_string(),
            pending: HashSet::new(),
            devices: HashMap::new(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn identifier(&self, name: &str) -> Identifier {
        Identifier::from_name(name, &self.suffix)
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.pending.contains(id) || self.devices.contains_key(id)
    }

    pub fn is_pending(&self, id: &Identifier) -> bool {
        self.pending.contains(id)
    }

    /// Identifiers of every entry, pending or resolved.
    pub fn identifiers(&self) -> Vec<Identifier> {
        let mut ids: Vec<Identifier> = self
            .pending
            .iter()
            .chain(self.devices.keys())
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// The resolved device under `id`. Pending entries are not returned.
    pub fn get_mut(&mut self, id: &Identifier) -> Option<&mut TrackedDevice> {
        self.devices.get_mut(id)
    }

    pub fn resolved(&self) -> impl Iterator<Item = &TrackedDevice> {
        self.devices.values()
    }

    /// Look up `id`, promoting a pending entry when the provider already
    /// holds a resolved device under that identifier.
    pub fn resolve(&mut self, id: &Identifier, provider: &dyn DeviceProvider) -> Resolution<'_> {
        let promoted = if self.devices.contains_key(id) {
            false
        } else if self.pending.contains(id) {
            let Some(device) = provider.device(id) else {
                return Resolution::Hunting;
            };
            self.pending.remove(id);
            self.devices.insert(id.clone(), device);
            true
        } else {
            return Resolution::Unknown;
        };

        match self.devices.get_mut(id) {
            Some(device) if promoted => Resolution::Promoted(device),
            Some(device) => Resolution::Tracked(device),
            None => Resolution::Unknown,
        }
    }

    /// Record interest in `id`. Returns false when the identifier is already
    /// known, so the caller does not start a duplicate hunt.
    pub fn mark_pending(&mut self, id: Identifier) -> bool {
        if self.devices.contains_key(&id) {
            return false;
        }
        self.pending.insert(id)
    }

    /// The identifier a neighbor row belongs to. An entry already known
    /// under the row's IP or host column claims the row before the name
    /// derived from it, so a device tracked by address is not tracked twice.
    pub fn claim(&self, row: &NeighborEntry) -> Identifier {
        let derived = self.identifier(&row.name);
        if self.contains(&derived) {
            return derived;
        }
        row.ip
            .map(|ip| ip.to_string())
            .into_iter()
            .chain(std::iter::once(row.address.clone()))
            .map(|name| self.identifier(&name))
            .find(|id| self.contains(id))
            .unwrap_or(derived)
    }

    /// Merge one neighbor table row. A new or pending identifier becomes a
    /// resolved device; a resolved one has its link details refreshed.
    pub fn upsert_from_discovery(&mut self, row: &NeighborEntry) -> Upsert<'_> {
        let id = self.claim(row);
        let created = !self.devices.contains_key(&id);
        if created {
            self.pending.remove(&id);
        }

        let device = self
            .devices
            .entry(id)
            .or_insert_with_key(|id| TrackedDevice::new(id.clone(), &row.link_address, &row.interface));
        if !created {
            device.link_address.clone_from(&row.link_address);
            device.interface.clone_from(&row.interface);
        }
        Upsert { created, device }
    }
}
