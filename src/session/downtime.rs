//! Disconnect/downtime accounting.
//!
//! A [`DisconnectEvent`] is recorded exactly once per disconnect->reconnect
//! cycle, at the moment reconnection succeeds, using the originally recorded
//! disconnect timestamp. Duration therefore reflects realized downtime, not
//! a guess made at disconnect time.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// One realized outage. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisconnectEvent {
    pub disconnected_at: DateTime<Utc>,
    pub duration_seconds: u64,
}

impl DisconnectEvent {
    /// Disconnect time in ISO-8601, the form forwarded to the external
    /// store.
    pub fn disconnected_at_iso8601(&self) -> String {
        self.disconnected_at
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Pending-disconnect marker plus the ordered outage log (newest first).
#[derive(Debug, Default)]
pub struct DowntimeTracker {
    pending_since: Option<DateTime<Utc>>,
    history: Vec<DisconnectEvent>,
}

impl DowntimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the downtime clock, unless a cycle is already open. Rapid
    /// close-close flapping keeps the original start time.
    pub fn mark_disconnected(&mut self, now: DateTime<Utc>) {
        if self.pending_since.is_none() {
            self.pending_since = Some(now);
        }
    }

    /// Close the cycle: the marker is taken and the event appended in one
    /// step, so a cycle can never produce two events.
    pub fn record_reconnect(&mut self, now: DateTime<Utc>) -> Option<DisconnectEvent> {
        let disconnected_at = self.pending_since.take()?;
        let duration_seconds = (now - disconnected_at).num_seconds().max(0) as u64;
        let event = DisconnectEvent {
            disconnected_at,
            duration_seconds,
        };
        self.history.insert(0, event.clone());
        Some(event)
    }

    /// Whether a disconnect cycle is currently open.
    pub fn is_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    /// Outage log, newest first.
    pub fn history(&self) -> &[DisconnectEvent] {
        &self.history
    }
}
