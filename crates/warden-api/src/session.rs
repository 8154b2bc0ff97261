//! Session record and lifecycle status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use warden_util::{ChildId, DeviceId, SessionId};

/// Session lifecycle status
///
/// `Completed` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    /// In a mandatory break
    Paused,
    /// Stopped on request
    Completed,
    /// Ran out of time
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Expired)
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "paused" => Some(SessionStatus::Paused),
            "completed" => Some(SessionStatus::Completed),
            "expired" => Some(SessionStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session reached a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// Explicit stop request
    Stopped,
    /// Committed time ran out
    Expired,
}

impl SessionEndReason {
    /// Terminal status recorded for this reason
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionEndReason::Stopped => SessionStatus::Completed,
            SessionEndReason::Expired => SessionStatus::Expired,
        }
    }
}

/// One time-bounded grant of a device to one or more children
///
/// Remaining time is never stored; it is derived from `started_at`,
/// `expected_minutes` and the break bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub device_id: DeviceId,
    /// Resource type of the device at start time
    pub device_kind: String,
    pub participants: Vec<ChildId>,
    /// Minutes already booked to a late joiner's usage when they joined
    #[serde(default)]
    pub prepaid_minutes: BTreeMap<ChildId, u32>,
    pub started_at: DateTime<Utc>,
    /// Committed duration; grows with each extension
    pub expected_minutes: u32,
    /// Set once, when the session ends
    pub actual_minutes: Option<u32>,
    pub status: SessionStatus,
    pub last_break_at: Option<DateTime<Utc>>,
    pub break_ends_at: Option<DateTime<Utc>>,
    /// Seconds spent in finished breaks
    #[serde(default)]
    pub paused_seconds: i64,
    pub warning_sent_at: Option<DateTime<Utc>>,
    pub last_extended_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by the store on every update
    #[serde(default)]
    pub version: u64,
}

impl Session {
    pub fn new(
        device_id: DeviceId,
        device_kind: impl Into<String>,
        participants: Vec<ChildId>,
        expected_minutes: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            device_id,
            device_kind: device_kind.into(),
            participants,
            prepaid_minutes: BTreeMap::new(),
            started_at,
            expected_minutes,
            actual_minutes: None,
            status: SessionStatus::Active,
            last_break_at: None,
            break_ends_at: None,
            paused_seconds: 0,
            warning_sent_at: None,
            last_extended_at: None,
            ended_at: None,
            version: 0,
        }
    }

    pub fn has_participant(&self, child_id: &ChildId) -> bool {
        self.participants.contains(child_id)
    }

    /// Minutes booked to `child_id` when they joined late (0 for founders)
    pub fn prepaid_for(&self, child_id: &ChildId) -> u32 {
        self.prepaid_minutes.get(child_id).copied().unwrap_or(0)
    }
}
