//! Transport layer: a dumb connect/send/receive primitive.
//!
//! The session manager owns every reconnection decision; a transport link
//! lives for exactly one connection and reports its lifecycle through
//! [`LinkEvent`]s. The traits exist to enable dependency injection and
//! testing against a mock broker.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub mod mqtt;

/// Transport-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection was refused because the signing credentials were
    /// invalid or expired.
    #[error("broker rejected signing credentials: {0}")]
    AuthRejected(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("unsubscribe failed: {0}")]
    Unsubscribe(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("link closed")]
    LinkClosed,
}

impl TransportError {
    /// Whether this failure means the signed URL itself was refused, i.e. a
    /// plain retry with the same credentials will fail identically.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, TransportError::AuthRejected(_))
    }
}

/// Lifecycle and traffic events of one transport link.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Broker acknowledged the connection; subscriptions can be replayed.
    Connected,
    /// Inbound publish on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
    /// Transport-level failure. Auth rejections route to the credential
    /// refresh path, everything else to generic reconnect scheduling.
    Error(TransportError),
    /// The link is gone. Always the final event of a link.
    Closed,
}

/// Connection factory: opens one link per call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to the signed URL. Returns the link handle and the
    /// event stream for this connection. `LinkEvent::Connected` arrives on
    /// the stream once the broker acknowledges.
    async fn open(
        &self,
        url: Url,
        keepalive: Duration,
    ) -> Result<(Box<dyn TransportLink>, mpsc::Receiver<LinkEvent>), TransportError>;
}

/// Handle to one live connection.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Subscribe to all `topics` in one batch.
    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Detach event delivery and close the connection, best effort.
    async fn shutdown(&self);
}
