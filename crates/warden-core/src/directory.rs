//! Device lookup

use std::collections::HashMap;
use std::sync::RwLock;
use warden_api::Device;
use warden_util::DeviceId;

/// Resolves a device to its kind and driver name
#[derive(Default)]
pub struct DeviceDirectory {
    devices: RwLock<HashMap<DeviceId, Device>>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let directory = Self::new();
        for device in devices {
            directory.insert(device);
        }
        directory
    }

    /// Add or replace a device
    pub fn insert(&self, device: Device) {
        self.devices
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device.id.clone(), device);
    }

    pub fn remove(&self, device_id: &DeviceId) -> Option<Device> {
        self.devices
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(device_id)
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<Device> {
        self.devices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(device_id)
            .cloned()
    }

    pub fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        devices
    }
}
