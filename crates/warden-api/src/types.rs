//! Shared record types

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use warden_util::{ChildId, DeviceId, is_weekend};

/// Mandatory rest rule: after `after_minutes` of continuous use the session
/// pauses for `break_minutes`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakRule {
    pub after_minutes: u32,
    pub break_minutes: u32,
}

/// A child whose usage is quota-limited
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Child {
    pub id: ChildId,
    pub name: String,
    /// Base allowance Monday to Friday
    pub weekday_minutes: u32,
    /// Base allowance Saturday and Sunday
    pub weekend_minutes: u32,
    pub break_rule: Option<BreakRule>,
    /// Whether the downtime window applies to this child
    pub downtime_enabled: bool,
}

impl Child {
    /// Base allowance for a calendar day
    pub fn base_minutes_for(&self, weekday: Weekday) -> u32 {
        if is_weekend(weekday) {
            self.weekend_minutes
        } else {
            self.weekday_minutes
        }
    }
}

/// A controllable device and the driver responsible for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub label: String,
    /// Free-form resource type ("tv", "console", ...)
    pub kind: String,
    /// Name of the registered driver that controls this device
    pub driver: String,
}

/// Minutes available to a child on one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAllocation {
    pub child_id: ChildId,
    pub day: NaiveDate,
    /// Copied from the child's weekday/weekend rule at first access
    pub base_minutes: u32,
    /// Cumulative reward minutes granted for the day
    pub bonus_minutes: u32,
}

impl DailyAllocation {
    pub fn total(&self) -> u32 {
        self.base_minutes.saturating_add(self.bonus_minutes)
    }
}

/// Minutes charged to a child on one calendar day from finished sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub child_id: ChildId,
    pub day: NaiveDate,
    pub minutes_used: u32,
    pub sessions_completed: u32,
}

impl DailyUsage {
    pub fn empty(child_id: ChildId, day: NaiveDate) -> Self {
        Self {
            child_id,
            day,
            minutes_used: 0,
            sessions_completed: 0,
        }
    }
}

/// Minutes to add to a child's usage row in the same write as a session update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageCharge {
    pub child_id: ChildId,
    pub day: NaiveDate,
    pub minutes: u32,
    /// Completed sessions to count (0 for a mid-session charge)
    pub sessions: u32,
}

/// Today's numbers for one child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildStatus {
    pub child_id: ChildId,
    pub day: NaiveDate,
    pub used_minutes: u32,
    pub remaining_minutes: u32,
    pub limit_minutes: u32,
    pub sessions_today: u32,
    pub in_downtime: bool,
}
