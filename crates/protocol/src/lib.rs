//! Little Box Protocol
//!
//! Defines the messages exchanged between the script host and its display.
//! This crate is the source of truth for the event stream wire format.

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;
