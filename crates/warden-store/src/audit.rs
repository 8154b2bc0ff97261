//! Audit event types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use warden_api::SessionEndReason;
use warden_util::{ChildId, DeviceId, SessionId};

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Session started
    SessionStarted {
        session_id: SessionId,
        device_id: DeviceId,
        participants: Vec<ChildId>,
        minutes: u32,
    },

    /// Session extended
    SessionExtended {
        session_id: SessionId,
        added_minutes: u32,
        expected_minutes: u32,
    },

    /// Session reached a terminal state
    SessionEnded {
        session_id: SessionId,
        reason: SessionEndReason,
        actual_minutes: u32,
    },

    /// Low-time warning sent to the device
    WarningIssued {
        session_id: SessionId,
        minutes_remaining: u32,
    },

    /// Mandatory break started
    BreakStarted {
        session_id: SessionId,
        triggered_by: ChildId,
        until: DateTime<Utc>,
    },

    /// Mandatory break ended
    BreakEnded { session_id: SessionId },

    /// Start request rejected
    StartDenied {
        device_id: DeviceId,
        child_id: Option<ChildId>,
        reason: String,
    },

    /// Children joined a running session
    ParticipantsJoined {
        session_id: SessionId,
        children: Vec<ChildId>,
        charged_minutes: u32,
    },

    /// Reward minutes added to a day's allocation
    BonusGranted {
        child_id: ChildId,
        day: NaiveDate,
        minutes: u32,
    },

    /// Downtime override set or cleared for a day
    DowntimeSkipped { day: NaiveDate, skip: bool },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(warden_util::now(), event)
    }

    /// Event stamped with an explicit time
    pub fn at(timestamp: DateTime<Utc>, event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
