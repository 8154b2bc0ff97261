//! Shared utilities for warden
//!
//! This crate provides:
//! - ID types (ChildId, DeviceId, SessionId)
//! - Time utilities (mock-able clock, wall-clock times, calendar day keys)
//! - Default paths for config and data directories

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
