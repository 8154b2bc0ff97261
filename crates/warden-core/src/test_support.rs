//! Shared fixtures for engine tests

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use warden_api::{BreakRule, Child, Device};
use warden_config::{Policy, ServiceConfig};
use warden_driver_api::{DriverRegistry, MockDriver};
use warden_store::{SqliteStore, Store};
use warden_util::{ChildId, DeviceId};

use crate::{DeviceDirectory, Reconciler, SessionManager};

/// Monday 2025-01-06 at `h:m` UTC
pub fn t(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, h, m, 0).unwrap()
}

pub fn child(id: &str, weekday_minutes: u32) -> Child {
    Child {
        id: ChildId::new(id),
        name: id.into(),
        weekday_minutes,
        weekend_minutes: weekday_minutes,
        break_rule: None,
        downtime_enabled: true,
    }
}

pub fn with_break(mut child: Child, after_minutes: u32, break_minutes: u32) -> Child {
    child.break_rule = Some(BreakRule {
        after_minutes,
        break_minutes,
    });
    child
}

pub fn device(id: &str, driver: &str) -> Device {
    Device {
        id: DeviceId::new(id),
        label: id.into(),
        kind: "tv".into(),
        driver: driver.into(),
    }
}

pub fn ids(names: &[&str]) -> Vec<ChildId> {
    names.iter().map(|n| ChildId::new(*n)).collect()
}

pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub driver: Arc<MockDriver>,
    pub devices: Arc<DeviceDirectory>,
    pub manager: Arc<SessionManager>,
}

impl Harness {
    /// Devices "tv" and "console" on the mock driver, plus "fridge" on an
    /// unregistered driver
    pub fn new(children: Vec<Child>) -> Self {
        Self::build(children, MockDriver::new(), |_| {})
    }

    pub fn build(children: Vec<Child>, driver: MockDriver, configure: impl FnOnce(&mut Policy)) -> Self {
        let mut policy = Policy {
            service: ServiceConfig::default(),
            downtime: Default::default(),
            children: children.clone(),
            devices: vec![device("tv", "mock"), device("console", "mock"), device("fridge", "cloud")],
        };
        configure(&mut policy);

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        for child in &policy.children {
            store.upsert_child(child).unwrap();
        }

        let driver = Arc::new(driver);
        let drivers = Arc::new(DriverRegistry::new());
        drivers.register(driver.clone());

        let devices = Arc::new(DeviceDirectory::from_devices(policy.devices.clone()));
        let manager = Arc::new(SessionManager::new(
            &policy,
            store.clone(),
            drivers,
            devices.clone(),
        ));

        Self {
            store,
            driver,
            devices,
            manager,
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.manager.clone())
    }
}
