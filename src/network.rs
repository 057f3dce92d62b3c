//! Device-level network observation.
//!
//! The host application feeds online/offline signals (the browser
//! `online`/`offline` listener equivalent) into a [`NetworkMonitor`]; the
//! session actor watches the receiver side and gates reconnect attempts on
//! it. Starts optimistically online.

use tokio::sync::watch;

/// Online/offline signal source for one or more sessions.
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx }
    }

    pub fn set_online(&self) {
        self.signal(true);
    }

    pub fn set_offline(&self) {
        self.signal(false);
    }

    /// Current connectivity belief.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver for the session actor.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    fn signal(&self, online: bool) {
        // Only notify on actual flips; repeated browser events are noisy.
        self.tx.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}
