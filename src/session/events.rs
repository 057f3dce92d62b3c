//! Connection state, the notification surface, and payload interpretation.

use serde_json::Value;

use super::downtime::DisconnectEvent;
use crate::error::ErrorCategory;

/// Connection state of the session.
///
/// Exactly one value at any time; mutated only by the session manager and
/// observed by collaborators through the status watch channel and
/// [`SessionEvent::StatusChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or explicitly stopped
    Idle,
    /// Connect sequence in progress
    Connecting,
    /// Broker acknowledged, subscriptions replayed
    Connected,
    /// Transport closed, reconnect pending or gated on the network
    Disconnected,
    /// Credential step failed; a retry is scheduled
    Error,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Notifications crossing the session boundary.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged(ConnectionState),
    /// Raw payload from a subscribed topic, in arrival order.
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Best-effort interpretation of a payload as a device status record.
    DeviceStatusChanged { device_id: String, status: String },
    /// Emitted once per disconnect -> successful-reconnect cycle.
    DisconnectRecorded(DisconnectEvent),
    ErrorOccurred {
        category: ErrorCategory,
        message: String,
    },
}

/// Interpret a payload as a single-key device-status record (pure function).
///
/// `{"pump-7": "running"}` maps device `pump-7` to status `running`.
/// Non-string status values are rendered as their JSON text. Anything that
/// is not a single-key object is not a status record.
pub fn parse_device_status(payload: &[u8]) -> Option<(String, String)> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    let (device_id, status) = object.iter().next()?;
    let status = match status {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some((device_id.clone(), status))
}
