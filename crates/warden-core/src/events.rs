//! Core events emitted by the engine

use chrono::{DateTime, Utc};
use serde::Serialize;
use warden_api::SessionEndReason;
use warden_util::{ChildId, DeviceId, SessionId};

/// Events emitted by the session manager and the reconciler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// Session admitted and its device started
    SessionStarted {
        session_id: SessionId,
        device_id: DeviceId,
        participants: Vec<ChildId>,
        expected_minutes: u32,
    },

    /// Committed duration grew
    SessionExtended {
        session_id: SessionId,
        added_minutes: u32,
        expected_minutes: u32,
    },

    /// Children joined a running session
    ParticipantsJoined {
        session_id: SessionId,
        children: Vec<ChildId>,
        charged_minutes: u32,
    },

    /// Low-time warning reached
    WarningIssued {
        session_id: SessionId,
        minutes_remaining: u32,
    },

    /// Session paused for a mandatory break
    BreakStarted {
        session_id: SessionId,
        triggered_by: ChildId,
        until: DateTime<Utc>,
    },

    /// Mandatory break over; session active again
    BreakEnded { session_id: SessionId },

    /// Session has ended
    SessionEnded {
        session_id: SessionId,
        reason: SessionEndReason,
        actual_minutes: u32,
    },
}

impl CoreEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            CoreEvent::SessionStarted { session_id, .. }
            | CoreEvent::SessionExtended { session_id, .. }
            | CoreEvent::ParticipantsJoined { session_id, .. }
            | CoreEvent::WarningIssued { session_id, .. }
            | CoreEvent::BreakStarted { session_id, .. }
            | CoreEvent::BreakEnded { session_id }
            | CoreEvent::SessionEnded { session_id, .. } => session_id,
        }
    }
}
