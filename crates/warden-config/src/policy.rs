//! Validated policy structures

use crate::schema::{RawChild, RawConfig, RawDevice, RawDowntime, RawServiceConfig, RawWindow};
use crate::validation::{parse_time, parse_weekday};
use chrono::Weekday;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use warden_api::{BreakRule, Child, Device};
use warden_util::{ChildId, DeviceId, WallClock, data_dir_without_env};

/// Default seconds between reconciliation sweeps
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;

/// Default low-time warning threshold
pub const DEFAULT_WARNING_MINUTES: u32 = 5;

/// Default upper bound on a driver call
pub const DEFAULT_DRIVER_TIMEOUT_SECS: u64 = 10;

/// Validated policy ready for use by the engine
#[derive(Debug, Clone)]
pub struct Policy {
    /// Service configuration
    pub service: ServiceConfig,

    /// Recurring downtime schedule
    pub downtime: DowntimeSchedule,

    /// Managed children
    pub children: Vec<Child>,

    /// Controllable devices
    pub devices: Vec<Device>,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            downtime: raw.downtime.map(convert_downtime).unwrap_or_default(),
            children: raw.children.into_iter().map(convert_child).collect(),
            devices: raw.devices.into_iter().map(convert_device).collect(),
        }
    }

    /// Get child by ID
    pub fn get_child(&self, id: &ChildId) -> Option<&Child> {
        self.children.iter().find(|c| &c.id == id)
    }

    /// Get device by ID
    pub fn get_device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| &d.id == id)
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub timezone: Tz,
    pub tick_interval: Duration,
    pub warning_minutes: u32,
    pub driver_timeout: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            data_dir: raw.data_dir.unwrap_or_else(data_dir_without_env),
            timezone: raw
                .timezone
                .and_then(|tz| tz.parse().ok())
                .unwrap_or(Tz::UTC),
            tick_interval: Duration::from_secs(
                raw.tick_interval_seconds
                    .unwrap_or(DEFAULT_TICK_INTERVAL_SECS),
            ),
            warning_minutes: raw.warning_minutes.unwrap_or(DEFAULT_WARNING_MINUTES),
            driver_timeout: Duration::from_secs(
                raw.driver_timeout_seconds
                    .unwrap_or(DEFAULT_DRIVER_TIMEOUT_SECS),
            ),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// One daily downtime range
///
/// `start > end` means the window wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DowntimeWindow {
    pub start: WallClock,
    pub end: WallClock,
}

impl DowntimeWindow {
    pub fn new(start: WallClock, end: WallClock) -> Self {
        Self { start, end }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    /// Whether a minute-of-day falls inside the window (start inclusive, end exclusive)
    pub fn contains_minute(&self, minute: u32) -> bool {
        let start = self.start.minutes_from_midnight();
        let end = self.end.minutes_from_midnight();

        if self.wraps_midnight() {
            minute >= start || minute < end
        } else {
            minute >= start && minute < end
        }
    }
}

/// Layered downtime schedule; the most specific layer wins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DowntimeSchedule {
    /// Explicit per-day windows
    pub per_day: HashMap<Weekday, DowntimeWindow>,
    /// Shared Monday to Friday window
    pub weekday: Option<DowntimeWindow>,
    /// Shared Saturday and Sunday window
    pub weekend: Option<DowntimeWindow>,
    /// Flat window applied to every day
    pub legacy: Option<DowntimeWindow>,
}

impl DowntimeSchedule {
    /// A schedule with a single flat window
    pub fn flat(window: DowntimeWindow) -> Self {
        Self {
            legacy: Some(window),
            ..Default::default()
        }
    }

    /// No layer configured means downtime is disabled
    pub fn is_enabled(&self) -> bool {
        !self.per_day.is_empty()
            || self.weekday.is_some()
            || self.weekend.is_some()
            || self.legacy.is_some()
    }

    /// Window that applies on `weekday`, if any
    pub fn window_for(&self, weekday: Weekday) -> Option<DowntimeWindow> {
        if let Some(window) = self.per_day.get(&weekday) {
            return Some(*window);
        }

        let shared = if warden_util::is_weekend(weekday) {
            self.weekend
        } else {
            self.weekday
        };

        shared.or(self.legacy)
    }
}

// Conversion helpers

fn convert_child(raw: RawChild) -> Child {
    let break_rule = match (raw.break_after_minutes, raw.break_minutes) {
        (Some(after_minutes), Some(break_minutes)) => Some(BreakRule {
            after_minutes,
            break_minutes,
        }),
        _ => None,
    };

    Child {
        name: raw.name.unwrap_or_else(|| raw.id.clone()),
        id: ChildId::new(raw.id),
        weekday_minutes: raw.weekday_minutes,
        weekend_minutes: raw.weekend_minutes.unwrap_or(raw.weekday_minutes),
        break_rule,
        downtime_enabled: raw.downtime,
    }
}

fn convert_device(raw: RawDevice) -> Device {
    Device {
        label: raw.label.unwrap_or_else(|| raw.id.clone()),
        id: DeviceId::new(raw.id),
        kind: raw.kind,
        driver: raw.driver,
    }
}

fn convert_downtime(raw: RawDowntime) -> DowntimeSchedule {
    let legacy = match (&raw.start, &raw.end) {
        (Some(start), Some(end)) => convert_times(start, end),
        _ => None,
    };

    let per_day = raw
        .days
        .iter()
        .filter_map(|(day, window)| Some((parse_weekday(day).ok()?, convert_window(window)?)))
        .collect();

    DowntimeSchedule {
        per_day,
        weekday: raw.weekday.as_ref().and_then(convert_window),
        weekend: raw.weekend.as_ref().and_then(convert_window),
        legacy,
    }
}

fn convert_window(raw: &RawWindow) -> Option<DowntimeWindow> {
    convert_times(&raw.start, &raw.end)
}

fn convert_times(start: &str, end: &str) -> Option<DowntimeWindow> {
    let (start_h, start_m) = parse_time(start).ok()?;
    let (end_h, end_m) = parse_time(end).ok()?;

    Some(DowntimeWindow::new(
        WallClock::new(start_h, start_m)?,
        WallClock::new(end_h, end_m)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: (u8, u8), end: (u8, u8)) -> DowntimeWindow {
        DowntimeWindow::new(
            WallClock::new(start.0, start.1).unwrap(),
            WallClock::new(end.0, end.1).unwrap(),
        )
    }

    #[test]
    fn test_overnight_window_contains() {
        let w = window((22, 0), (10, 0));
        assert!(w.wraps_midnight());

        assert!(!w.contains_minute(21 * 60 + 59));
        assert!(w.contains_minute(22 * 60));
        assert!(w.contains_minute(23 * 60 + 59));
        assert!(w.contains_minute(0));
        assert!(w.contains_minute(9 * 60 + 59));
        assert!(!w.contains_minute(10 * 60));
    }

    #[test]
    fn test_same_day_window_contains() {
        let w = window((13, 0), (15, 0));
        assert!(!w.wraps_midnight());

        assert!(!w.contains_minute(12 * 60 + 59));
        assert!(w.contains_minute(13 * 60));
        assert!(w.contains_minute(14 * 60 + 59));
        assert!(!w.contains_minute(15 * 60));
    }

    #[test]
    fn test_schedule_precedence() {
        let mut schedule = DowntimeSchedule::flat(window((21, 0), (7, 0)));
        schedule.weekend = Some(window((23, 0), (9, 0)));
        schedule.per_day.insert(Weekday::Fri, window((22, 0), (8, 0)));

        assert_eq!(schedule.window_for(Weekday::Mon), Some(window((21, 0), (7, 0))));
        assert_eq!(schedule.window_for(Weekday::Fri), Some(window((22, 0), (8, 0))));
        assert_eq!(schedule.window_for(Weekday::Sun), Some(window((23, 0), (9, 0))));
    }

    #[test]
    fn test_empty_schedule_disabled() {
        let schedule = DowntimeSchedule::default();
        assert!(!schedule.is_enabled());
        assert_eq!(schedule.window_for(Weekday::Wed), None);
    }

    #[test]
    fn test_weekday_only_schedule_leaves_weekend_open() {
        let schedule = DowntimeSchedule {
            weekday: Some(window((20, 0), (7, 0))),
            ..Default::default()
        };

        assert!(schedule.is_enabled());
        assert!(schedule.window_for(Weekday::Tue).is_some());
        assert!(schedule.window_for(Weekday::Sat).is_none());
    }

    #[test]
    fn test_child_defaults() {
        let child = convert_child(RawChild {
            id: "alice".into(),
            name: None,
            weekday_minutes: 60,
            weekend_minutes: None,
            break_after_minutes: Some(30),
            break_minutes: Some(10),
            downtime: true,
        });

        assert_eq!(child.name, "alice");
        assert_eq!(child.weekend_minutes, 60);
        assert_eq!(
            child.break_rule,
            Some(BreakRule {
                after_minutes: 30,
                break_minutes: 10
            })
        );
    }
}
