//! File-backed device store and logging property sink.
//!
//! Stands in for a host framework: registered devices and their expiry
//! settings are kept in one JSON file so tracked devices survive restarts,
//! and property changes are written to the log.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use presence_core::error::Result;
use presence_core::{
    DeviceProvider, ExpiryUnit, Identifier, PropertyChange, PropertySink, TrackedDevice,
};

/// What is persisted for one registered device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRecord {
    pub name: String,
    pub title: String,
    pub link_address: String,
    pub interface: String,
    pub expiry: u32,
    pub expiry_unit: ExpiryUnit,
}

impl From<&TrackedDevice> for DeviceRecord {
    fn from(device: &TrackedDevice) -> Self {
        Self {
            name: device.id.name().to_string(),
            title: device.title.clone(),
            link_address: device.link_address.clone(),
            interface: device.interface.clone(),
            expiry: device.expiry(),
            expiry_unit: device.expiry_unit(),
        }
    }
}

/// Device store persisted as a JSON object keyed by identifier.
pub struct FileDeviceStore {
    path: PathBuf,
    suffix: String,
    records: BTreeMap<String, DeviceRecord>,
}

impl FileDeviceStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>, suffix: &str) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str(&json)?
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), devices = records.len(), "Device store opened");

        Ok(Self {
            path,
            suffix: suffix.to_string(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identifiers of every stored device.
    pub fn identifiers(&self) -> Vec<Identifier> {
        self.records
            .values()
            .map(|r| Identifier::from_name(&r.name, &self.suffix))
            .collect()
    }

    /// Stored title for `id`, used when announcing saved devices at startup.
    pub fn title(&self, id: &Identifier) -> Option<&str> {
        self.records.get(id.as_str()).map(|r| r.title.as_str())
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.records)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl DeviceProvider for FileDeviceStore {
    fn device(&self, id: &Identifier) -> Option<TrackedDevice> {
        let record = self.records.get(id.as_str())?;
        match TrackedDevice::restore(
            id.clone(),
            &record.link_address,
            &record.interface,
            record.expiry,
            record.expiry_unit,
        ) {
            Ok(mut device) => {
                device.title.clone_from(&record.title);
                Some(device)
            }
            Err(e) => {
                tracing::warn!(device = %id, error = %e, "Ignoring invalid stored device");
                None
            }
        }
    }

    fn register(&mut self, device: &TrackedDevice) -> Result<()> {
        self.records
            .insert(device.id.to_string(), DeviceRecord::from(device));
        self.save()?;
        tracing::debug!(device = %device.id, path = %self.path.display(), "Device saved");
        Ok(())
    }
}

/// Property sink that logs every change.
#[derive(Debug, Default)]
pub struct TracingSink;

impl PropertySink for TracingSink {
    fn publish(&mut self, change: PropertyChange) {
        let value = serde_json::to_string(&change.value).unwrap_or_default();
        match change.property {
            presence_core::Property::Seconds
            | presence_core::Property::Minutes
            | presence_core::Property::Hours
            | presence_core::Property::Days => tracing::trace!(
                device = %change.device,
                property = change.property.name(),
                value = %value,
                "Property changed"
            ),
            _ => tracing::info!(
                device = %change.device,
                property = change.property.name(),
                value = %value,
                "Property changed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUFFIX: &str = "-np";

    fn device(name: &str) -> TrackedDevice {
        TrackedDevice::new(
            Identifier::from_name(name, SUFFIX),
            "aa:bb:cc:dd:ee:ff",
            "eth0",
        )
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDeviceStore::open(dir.path().join("devices.json"), SUFFIX).unwrap();
        assert!(store.identifiers().is_empty());
        assert!(store.device(&Identifier::from_name("x", SUFFIX)).is_none());
    }

    #[test]
    fn test_register_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("devices.json");

        let mut phone = device("phone");
        phone.change_expiry_unit(ExpiryUnit::Minutes);
        phone.set_expiry(25).unwrap();

        let mut store = FileDeviceStore::open(&path, SUFFIX).unwrap();
        store.register(&phone).unwrap();

        let reopened = FileDeviceStore::open(&path, SUFFIX).unwrap();
        assert_eq!(reopened.identifiers(), vec![phone.id.clone()]);
        assert_eq!(reopened.title(&phone.id), Some("phone"));

        let restored = reopened.device(&phone.id).unwrap();
        assert_eq!(restored.link_address, "aa:bb:cc:dd:ee:ff");
        assert_eq!(restored.expiry_unit(), ExpiryUnit::Minutes);
        assert_eq!(restored.expiry(), 25);
        assert!(!restored.is_present());
    }

    #[test]
    fn test_register_overwrites_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileDeviceStore::open(dir.path().join("d.json"), SUFFIX).unwrap();

        let mut tv = device("tv");
        store.register(&tv).unwrap();
        tv.change_expiry_unit(ExpiryUnit::Days);
        store.register(&tv).unwrap();

        assert_eq!(store.identifiers().len(), 1);
        assert_eq!(store.device(&tv.id).unwrap().expiry_unit(), ExpiryUnit::Days);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.json");
        fs::write(&path, "{not json").unwrap();
        assert!(FileDeviceStore::open(&path, SUFFIX).is_err());
    }
}
