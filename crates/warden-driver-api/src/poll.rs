//! Pull-mode driver
//!
//! Devices run a small agent that asks "what should I be doing now?". This
//! driver never talks to a device; it records the answer for each one.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;
use warden_api::Session;
use warden_util::{DeviceId, SessionId};

use crate::{DeviceDriver, DriverCapabilities, DriverResult, SessionExtender};

/// Registry name of the pull-mode driver
pub const POLL_DRIVER_NAME: &str = "poll";

/// Desired state of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeviceCommand {
    Locked,
    Unlocked {
        session_id: SessionId,
        until: DateTime<Utc>,
    },
    Warned {
        session_id: SessionId,
        minutes_remaining: u32,
        until: DateTime<Utc>,
    },
}

pub struct PollDriver {
    capabilities: DriverCapabilities,
    commands: RwLock<HashMap<DeviceId, DeviceCommand>>,
}

impl PollDriver {
    pub fn new() -> Self {
        Self {
            capabilities: DriverCapabilities::pull().with_warn().with_extend(),
            commands: RwLock::new(HashMap::new()),
        }
    }

    /// What the agent on `device_id` should do; unknown devices stay locked
    pub fn command_for(&self, device_id: &DeviceId) -> DeviceCommand {
        self.commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(device_id)
            .cloned()
            .unwrap_or(DeviceCommand::Locked)
    }

    fn set(&self, device_id: &DeviceId, command: DeviceCommand) {
        debug!(device_id = %device_id, ?command, "Device command updated");
        self.commands
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device_id.clone(), command);
    }
}

impl Default for PollDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Committed end of a session, not counting a break still in progress
fn committed_end(session: &Session) -> DateTime<Utc> {
    session.started_at
        + Duration::minutes(session.expected_minutes as i64)
        + Duration::seconds(session.paused_seconds)
}

#[async_trait]
impl DeviceDriver for PollDriver {
    fn name(&self) -> &str {
        POLL_DRIVER_NAME
    }

    fn capabilities(&self) -> &DriverCapabilities {
        &self.capabilities
    }

    async fn start(&self, session: &Session) -> DriverResult<()> {
        self.set(
            &session.device_id,
            DeviceCommand::Unlocked {
                session_id: session.id.clone(),
                until: committed_end(session),
            },
        );
        Ok(())
    }

    async fn stop(&self, session: &Session) -> DriverResult<()> {
        self.set(&session.device_id, DeviceCommand::Locked);
        Ok(())
    }

    async fn warn(&self, session: &Session, minutes_remaining: u32) -> DriverResult<()> {
        self.set(
            &session.device_id,
            DeviceCommand::Warned {
                session_id: session.id.clone(),
                minutes_remaining,
                until: committed_end(session),
            },
        );
        Ok(())
    }

    fn extender(&self) -> Option<&dyn SessionExtender> {
        Some(self)
    }
}

#[async_trait]
impl SessionExtender for PollDriver {
    async fn extend(&self, session: &Session, additional_minutes: u32) -> DriverResult<()> {
        let until = committed_end(session) + Duration::minutes(additional_minutes as i64);
        self.set(
            &session.device_id,
            DeviceCommand::Unlocked {
                session_id: session.id.clone(),
                until,
            },
        );
        Ok(())
    }
}
