//! Observability support for host applications.
//!
//! The library itself only emits `tracing` events; hosts that want a
//! ready-made subscriber can use the initializers in [`logging`].

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
