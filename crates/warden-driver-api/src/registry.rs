//! Name to driver lookup

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::DeviceDriver;

/// Registered drivers keyed by name
///
/// Lookups take a shared lock; registration takes the exclusive one.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn DeviceDriver>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its own name, replacing any previous one
    pub fn register(&self, driver: Arc<dyn DeviceDriver>) {
        let name = driver.name().to_string();
        info!(driver = %name, mode = ?driver.capabilities().control_mode, "Driver registered");
        self.drivers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, driver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DeviceDriver>> {
        self.drivers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .drivers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
