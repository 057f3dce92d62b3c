//! Crate-level error types for the telemetry session core.
//!
//! Component modules define their own error enums (`SignerError`,
//! `CredentialError`, `TransportError`, `ConfigError`); this module unifies
//! them for callers and maps them onto the coarse categories carried by the
//! event surface.

use thiserror::Error;

use crate::config::ConfigError;
use crate::credentials::CredentialError;
use crate::session::ConnectionState;
use crate::signer::SignerError;
use crate::transport::TransportError;

/// Coarse classification attached to `SessionEvent::ErrorOccurred`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Identity fetch/refresh or URL signing failed
    Credential,
    /// Transport connect/runtime failure
    Transport,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Credential => "credential",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Main error type for session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("request signing failed: {0}")]
    Signing(#[from] SignerError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("session task is no longer running")]
    SessionClosed,
}

impl SessionError {
    /// Map onto the coarse category exposed to collaborators.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::Credential(_) | SessionError::Signing(_) => ErrorCategory::Credential,
            SessionError::Transport(_) | SessionError::NotConnected { .. } => {
                ErrorCategory::Transport
            }
            SessionError::Config(_) | SessionError::SessionClosed => ErrorCategory::Unknown,
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialError;
    use crate::signer::SignerError;
    use crate::transport::TransportError;

    #[test]
    fn test_category_mapping() {
        let e: SessionError = CredentialError::Missing.into();
        assert_eq!(e.category(), ErrorCategory::Credential);

        let e: SessionError = SignerError::MissingCredentials.into();
        assert_eq!(e.category(), ErrorCategory::Credential);

        let e: SessionError = TransportError::Connect("refused".to_string()).into();
        assert_eq!(e.category(), ErrorCategory::Transport);

        let e = SessionError::NotConnected {
            state: ConnectionState::Disconnected,
        };
        assert_eq!(e.category(), ErrorCategory::Transport);

        assert_eq!(SessionError::SessionClosed.category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Credential.to_string(), "credential");
        assert_eq!(ErrorCategory::Transport.to_string(), "transport");
        assert_eq!(ErrorCategory::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_error_display_is_not_empty() {
        let errors: Vec<SessionError> = vec![
            CredentialError::Missing.into(),
            SignerError::MissingCredentials.into(),
            TransportError::LinkClosed.into(),
            SessionError::SessionClosed,
            SessionError::NotConnected {
                state: ConnectionState::Idle,
            },
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
