//! Mock device driver for testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use warden_api::Session;
use warden_util::{DeviceId, SessionId};

use crate::{DeviceDriver, DriverCapabilities, DriverError, DriverResult, SessionExtender};

/// One call received by a [`MockDriver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Start {
        session_id: SessionId,
        device_id: DeviceId,
    },
    Stop {
        session_id: SessionId,
        device_id: DeviceId,
    },
    Warn {
        session_id: SessionId,
        minutes_remaining: u32,
    },
    Extend {
        session_id: SessionId,
        additional_minutes: u32,
    },
}

/// Mock driver for unit/integration testing
///
/// Every call is recorded, including calls that were scripted to fail.
pub struct MockDriver {
    name: String,
    capabilities: DriverCapabilities,
    calls: Mutex<Vec<DriverCall>>,
    delay: Mutex<Option<Duration>>,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    fail_warn: AtomicBool,
    fail_extend: AtomicBool,
}

impl MockDriver {
    /// Push driver with warning support, registered as "mock"
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: DriverCapabilities::push().with_warn(),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_warn: AtomicBool::new(false),
            fail_extend: AtomicBool::new(false),
        }
    }

    pub fn with_capabilities(mut self, caps: DriverCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Also expose the extension capability
    pub fn with_extender(mut self) -> Self {
        self.capabilities.can_extend = true;
        self
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_warn(&self, fail: bool) {
        self.fail_warn.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_extend(&self, fail: bool) {
        self.fail_extend.store(fail, Ordering::SeqCst);
    }

    /// Make every call sleep before answering
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// All calls received so far, oldest first
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Warnings received for `session_id`, as minutes remaining
    pub fn warnings_for(&self, session_id: &SessionId) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::Warn {
                    session_id: id,
                    minutes_remaining,
                } if &id == session_id => Some(minutes_remaining),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    async fn record(&self, call: DriverCall, fail: &AtomicBool, error: DriverError) -> DriverResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);

        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if fail.load(Ordering::SeqCst) {
            Err(error)
        } else {
            Ok(())
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDriver for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &DriverCapabilities {
        &self.capabilities
    }

    async fn start(&self, session: &Session) -> DriverResult<()> {
        self.record(
            DriverCall::Start {
                session_id: session.id.clone(),
                device_id: session.device_id.clone(),
            },
            &self.fail_start,
            DriverError::StartFailed("Mock start failure".into()),
        )
        .await
    }

    async fn stop(&self, session: &Session) -> DriverResult<()> {
        self.record(
            DriverCall::Stop {
                session_id: session.id.clone(),
                device_id: session.device_id.clone(),
            },
            &self.fail_stop,
            DriverError::StopFailed("Mock stop failure".into()),
        )
        .await
    }

    async fn warn(&self, session: &Session, minutes_remaining: u32) -> DriverResult<()> {
        if !self.capabilities.can_warn {
            return Err(DriverError::Unsupported("mock warn disabled".into()));
        }

        self.record(
            DriverCall::Warn {
                session_id: session.id.clone(),
                minutes_remaining,
            },
            &self.fail_warn,
            DriverError::WarnFailed("Mock warn failure".into()),
        )
        .await
    }

    fn extender(&self) -> Option<&dyn SessionExtender> {
        if self.capabilities.can_extend {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl SessionExtender for MockDriver {
    async fn extend(&self, session: &Session, additional_minutes: u32) -> DriverResult<()> {
        self.record(
            DriverCall::Extend {
                session_id: session.id.clone(),
                additional_minutes,
            },
            &self.fail_extend,
            DriverError::ExtendFailed("Mock extend failure".into()),
        )
        .await
    }
}
