//! Core time budget engine and session state machine for warden
//!
//! This crate is the heart of warden, containing:
//! - Time budget calculation (available, consumed and remaining minutes)
//! - Downtime evaluation (recurring exclusion windows)
//! - Session lifecycle (Active <-> Paused -> Completed | Expired)
//! - The reconciliation sweep that enforces breaks, warnings and expiry

mod budget;
mod directory;
mod downtime;
mod error;
mod events;
mod manager;
mod reconciler;
mod session;

#[cfg(test)]
mod test_support;

pub use budget::*;
pub use directory::*;
pub use downtime::*;
pub use error::*;
pub use events::*;
pub use manager::*;
pub use reconciler::*;
pub use session::*;
