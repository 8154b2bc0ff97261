//! Domain records for warden
//!
//! This crate defines the data shared between the engine, the store and the
//! device drivers:
//! - Children and their allowances
//! - Devices
//! - Sessions and their lifecycle status
//! - Daily allocation and usage rows
//! - Per-child status summaries

mod session;
mod types;

pub use session::*;
pub use types::*;
