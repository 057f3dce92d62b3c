//! pumplink - resilient telemetry session core
//!
//! The session-management core of a pump-fleet telemetry dashboard: one
//! authenticated MQTT-over-WebSocket session against AWS IoT Core that
//! survives an unreliable network. Covers SigV4 URL signing, credential
//! lifecycle (Cognito identity pool), the connection state machine,
//! exponential-backoff reconnection with jitter, topic-subscription replay
//! and disconnect/downtime accounting. The rendered UI, state store and
//! topic discovery are external collaborators fed through a small event
//! surface.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use pumplink::config::SessionConfig;
//! use pumplink::credentials::CognitoCredentialSource;
//! use pumplink::network::NetworkMonitor;
//! use pumplink::session::{Session, SessionEvent};
//! use pumplink::transport::mqtt::MqttWsTransport;
//!
//! # async fn run() -> pumplink::SessionResult<()> {
//! let config = SessionConfig::from_env()?;
//! let source = Arc::new(CognitoCredentialSource::new(
//!     &config.region,
//!     config.identity_pool_id.clone(),
//! ));
//! let network = NetworkMonitor::new();
//!
//! let session = Session::spawn(
//!     config,
//!     source,
//!     Arc::new(MqttWsTransport::new()),
//!     network.watch(),
//! )?;
//!
//! let mut events = session.events();
//! session.start()?;
//! session.subscribe("pump/alerts")?;
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         SessionEvent::DeviceStatusChanged { device_id, status } => {
//!             println!("{device_id} is now {status}");
//!         }
//!         SessionEvent::DisconnectRecorded(outage) => {
//!             println!("down {}s from {}", outage.duration_seconds,
//!                 outage.disconnected_at_iso8601());
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod credentials;
pub mod error;
pub mod network;
pub mod observability;
pub mod session;
pub mod signer;
pub mod subscriptions;
pub mod testing;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use config::{ConfigError, SessionConfig};
pub use credentials::{CognitoCredentialSource, CredentialError, CredentialSource, Credentials};
pub use error::{ErrorCategory, SessionError, SessionResult};
pub use network::NetworkMonitor;
pub use session::{ConnectionState, DisconnectEvent, Session, SessionEvent};
pub use subscriptions::SubscriptionRegistry;
pub use transport::{mqtt::MqttWsTransport, Transport, TransportError, TransportLink};
