//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global service settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Recurring downtime schedule
    #[serde(default)]
    pub downtime: Option<RawDowntime>,

    /// Children whose screen time is managed
    #[serde(default)]
    pub children: Vec<RawChild>,

    /// Controllable devices
    #[serde(default)]
    pub devices: Vec<RawDevice>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// IANA timezone that defines calendar days and downtime (default: UTC)
    pub timezone: Option<String>,

    /// Seconds between reconciliation sweeps (default: 60)
    pub tick_interval_seconds: Option<u64>,

    /// Minutes before the end of a session at which the warning fires (default: 5)
    pub warning_minutes: Option<u32>,

    /// Upper bound on any single driver call, in seconds (default: 10)
    pub driver_timeout_seconds: Option<u64>,
}

/// Downtime configuration
///
/// The most specific schedule wins: `days.<day>`, then `weekday`/`weekend`,
/// then the flat `start`/`end` pair.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDowntime {
    /// Flat start applied to every day (HH:MM)
    pub start: Option<String>,

    /// Flat end applied to every day (HH:MM)
    pub end: Option<String>,

    /// Shared Monday to Friday schedule
    pub weekday: Option<RawWindow>,

    /// Shared Saturday and Sunday schedule
    pub weekend: Option<RawWindow>,

    /// Per-day schedules keyed by day name ("mon", "tuesday", ...)
    #[serde(default)]
    pub days: HashMap<String, RawWindow>,
}

/// Start/end pair in HH:MM format
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawWindow {
    pub start: String,
    pub end: String,
}

/// Raw child definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawChild {
    /// Unique stable ID
    pub id: String,

    /// Display name (defaults to the ID)
    pub name: Option<String>,

    /// Base allowance Monday to Friday
    pub weekday_minutes: u32,

    /// Base allowance Saturday and Sunday (defaults to the weekday allowance)
    pub weekend_minutes: Option<u32>,

    /// Continuous minutes before a mandatory break
    pub break_after_minutes: Option<u32>,

    /// Length of the mandatory break
    pub break_minutes: Option<u32>,

    /// Whether the downtime window applies to this child
    #[serde(default = "default_true")]
    pub downtime: bool,
}

/// Raw device definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawDevice {
    /// Unique stable ID
    pub id: String,

    /// Display label (defaults to the ID)
    pub label: Option<String>,

    /// Resource type ("tv", "console", ...)
    pub kind: String,

    /// Registered driver name
    pub driver: String,
}

fn default_true() -> bool {
    true
}
