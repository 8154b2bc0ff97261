//! Device driver traits

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use warden_api::Session;

use crate::DriverCapabilities;

/// Errors from device driver operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("Start failed: {0}")]
    StartFailed(String),

    #[error("Stop failed: {0}")]
    StopFailed(String),

    #[error("Warning failed: {0}")]
    WarnFailed(String),

    #[error("Extension failed: {0}")]
    ExtendFailed(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Driver '{driver}' timed out during {operation} after {after:?}")]
    Timeout {
        driver: String,
        operation: &'static str,
        after: Duration,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Device driver trait - implemented by each backend
///
/// Calls may fail and may have taken effect even when they fail; callers
/// never assume a failed call changed nothing.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Registry name ("poll", "mock", ...)
    fn name(&self) -> &str;

    /// Get the capabilities of this driver
    fn capabilities(&self) -> &DriverCapabilities;

    /// Unlock the session's device
    async fn start(&self, session: &Session) -> DriverResult<()>;

    /// Lock the session's device
    async fn stop(&self, session: &Session) -> DriverResult<()>;

    /// Tell the device how many minutes remain; zero announces a break
    async fn warn(&self, _session: &Session, _minutes_remaining: u32) -> DriverResult<()> {
        Err(DriverError::Unsupported(format!(
            "driver '{}' cannot warn",
            self.name()
        )))
    }

    /// Optional extension capability
    fn extender(&self) -> Option<&dyn SessionExtender> {
        None
    }

    /// Optional: check if the driver is healthy
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Drivers that must be told when a running session gets more time
#[async_trait]
pub trait SessionExtender: Send + Sync {
    async fn extend(&self, session: &Session, additional_minutes: u32) -> DriverResult<()>;
}

/// Run a driver call with an upper bound on its duration
pub async fn with_timeout<T>(
    limit: Duration,
    driver: &str,
    operation: &'static str,
    call: impl Future<Output = DriverResult<T>>,
) -> DriverResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout {
            driver: driver.to_string(),
            operation,
            after: limit,
        }),
    }
}
