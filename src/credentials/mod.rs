//! Credential snapshots and the source that produces them.
//!
//! A [`Credentials`] value is an immutable snapshot of temporary signing
//! material; the source replaces its cached snapshot atomically on refresh.
//! The session manager never stores credentials, it only borrows a snapshot
//! long enough to sign one connection URL.

pub mod cognito;

pub use cognito::CognitoCredentialSource;

use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use secrecy::SecretString;
use thiserror::Error;

/// Immutable temporary-credential snapshot.
///
/// The secret key is wrapped in [`SecretString`] so accidental `Debug`
/// logging cannot leak it.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
        expiration: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::from(secret_access_key.into()),
            session_token,
            expiration,
        }
    }

    /// Whether the snapshot is usable for signing at all.
    pub fn has_access_key(&self) -> bool {
        !self.access_key_id.trim().is_empty()
    }

    /// Whether the snapshot expires within `lookahead` of `now`.
    ///
    /// Snapshots without an expiry never report as expiring.
    pub fn expires_within(&self, lookahead: TimeDelta, now: DateTime<Utc>) -> bool {
        match self.expiration {
            Some(expiration) => expiration - now < lookahead,
            None => false,
        }
    }
}

/// Credential fetch/refresh errors
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("identity request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("identity service error: {0}")]
    Service(String),

    #[error("identity service returned no credentials")]
    Missing,

    /// A refresh is already running; callers await its outcome instead of
    /// starting a duplicate network round-trip.
    #[error("credential refresh already in progress")]
    RefreshInFlight,
}

/// Source of temporary credentials backed by an external identity mechanism.
///
/// Failure is reported, never swallowed; the session manager decides whether
/// to retry.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Obtain a first credential snapshot, fetching if none is cached.
    async fn fetch_initial(&self) -> Result<Credentials, CredentialError>;

    /// Force a rotation. Single-flight: a call while another refresh is
    /// outstanding returns [`CredentialError::RefreshInFlight`].
    async fn refresh(&self) -> Result<Credentials, CredentialError>;

    /// Non-blocking read of the last known snapshot.
    fn current(&self) -> Option<Credentials>;
}
