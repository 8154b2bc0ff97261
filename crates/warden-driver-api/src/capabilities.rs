//! Driver capabilities model

use serde::{Deserialize, Serialize};

/// How a driver reaches its devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// The driver actively commands the device
    Push,
    /// An agent on the device polls for its desired state
    Pull,
}

/// Describes what a driver can do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCapabilities {
    pub control_mode: ControlMode,

    /// Can surface a low-time warning on the device
    pub can_warn: bool,

    /// Can be told that a running session was extended
    pub can_extend: bool,
}

impl DriverCapabilities {
    /// Push driver that can only start and stop
    pub fn push() -> Self {
        Self {
            control_mode: ControlMode::Push,
            can_warn: false,
            can_extend: false,
        }
    }

    /// Pull driver that can only start and stop
    pub fn pull() -> Self {
        Self {
            control_mode: ControlMode::Pull,
            ..Self::push()
        }
    }

    pub fn with_warn(mut self) -> Self {
        self.can_warn = true;
        self
    }

    pub fn with_extend(mut self) -> Self {
        self.can_extend = true;
        self
    }
}

impl Default for DriverCapabilities {
    fn default() -> Self {
        Self::push()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_capabilities() {
        let caps = DriverCapabilities::default();
        assert_eq!(caps.control_mode, ControlMode::Push);
        assert!(!caps.can_warn);
        assert!(!caps.can_extend);
    }

    #[test]
    fn builder_capabilities() {
        let caps = DriverCapabilities::pull().with_warn().with_extend();
        assert_eq!(caps.control_mode, ControlMode::Pull);
        assert!(caps.can_warn);
        assert!(caps.can_extend);
    }
}
