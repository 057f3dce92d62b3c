//! The session manager and its event surface.
//!
//! [`Session`] is the handle; the state machine itself runs as a spawned
//! actor that owns all mutable session state and serializes every stimulus
//! (commands, transport events, timer firings, network signals, credential
//! outcomes) through one loop.

mod downtime;
mod events;
mod manager;

pub use downtime::{DisconnectEvent, DowntimeTracker};
pub use events::{parse_device_status, ConnectionState, SessionEvent};
pub use manager::Session;
