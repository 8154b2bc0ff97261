//! Session engine errors

use chrono::{DateTime, Utc};
use thiserror::Error;
use warden_api::SessionStatus;
use warden_driver_api::DriverError;
use warden_store::StoreError;
use warden_util::{ChildId, DeviceId, SessionId};

/// Why a lifecycle operation was rejected
///
/// Everything except `Driver` and `Store` is reported before any write.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A session needs at least one participant")]
    EmptyParticipants,

    #[error("Duration must be a positive number of minutes")]
    InvalidDuration,

    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("Unknown child: {0}")]
    UnknownChild(ChildId),

    #[error("No driver registered as '{0}'")]
    UnknownDriver(String),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("{child_id} has {remaining} minutes left, {requested} requested")]
    InsufficientTime {
        child_id: ChildId,
        remaining: u32,
        requested: u32,
    },

    #[error("Downtime is active for {child_id} until {until}")]
    DowntimeActive {
        child_id: ChildId,
        until: DateTime<Utc>,
    },

    #[error("Session {session_id} is {status}")]
    InvalidState {
        session_id: SessionId,
        status: SessionStatus,
    },

    #[error("Driver error: {0}")]
    Driver(DriverError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Rejected on quota grounds rather than bad input or failure
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            SessionError::InsufficientTime { .. } | SessionError::DowntimeActive { .. }
        )
    }
}

impl From<DriverError> for SessionError {
    fn from(e: DriverError) -> Self {
        SessionError::Driver(e)
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
