//! Device driver trait interfaces for warden
//!
//! This crate defines the capability-based interface between the session
//! engine and the backends that physically unlock, warn and lock devices.
//! Two backends ship with it: a scriptable mock for tests and a pull-mode
//! driver that records the desired state of each device for agents to poll.

mod capabilities;
mod mock;
mod poll;
mod registry;
mod traits;

pub use capabilities::*;
pub use mock::*;
pub use poll::*;
pub use registry::*;
pub use traits::*;
