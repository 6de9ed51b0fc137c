//! Error types for the Ampache provider

use bridge_traits::error::BridgeError;
use core_auth::AuthError;
use thiserror::Error;

use crate::envelope::ApiFault;

/// Ampache provider errors
#[derive(Error, Debug)]
pub enum AmpacheError {
    /// Connectivity failure; the caller should skip the operation
    #[error("Network error: {0}")]
    Transport(String),

    /// Non-success HTTP status without an error envelope
    #[error("HTTP error (status {status})")]
    Http { status: u16 },

    /// The response body is not well-formed XML
    #[error("Malformed XML response: {0}")]
    Xml(String),

    /// The server answered with an error envelope
    #[error("Ampache API error {}: {}", .0.code, .0.message)]
    Fault(ApiFault),

    /// The handshake response lacks a session token
    #[error("Invalid handshake response: {0}")]
    Handshake(String),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Bridge(BridgeError),
}

impl AmpacheError {
    pub fn is_transport(&self) -> bool {
        matches!(self, AmpacheError::Transport(_))
    }

    pub fn fault(&self) -> Option<&ApiFault> {
        match self {
            AmpacheError::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

impl From<BridgeError> for AmpacheError {
    fn from(error: BridgeError) -> Self {
        if error.is_transport() {
            AmpacheError::Transport(error.to_string())
        } else {
            AmpacheError::Bridge(error)
        }
    }
}

impl From<AmpacheError> for AuthError {
    fn from(error: AmpacheError) -> Self {
        match error {
            AmpacheError::Transport(msg) => AuthError::Transport(msg),
            AmpacheError::Fault(fault) => AuthError::Rejected {
                code: fault.code,
                message: fault.message,
            },
            other => AuthError::HandshakeFailed {
                server: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

/// Result type for Ampache operations
pub type Result<T> = std::result::Result<T, AmpacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let error = AmpacheError::Fault(ApiFault {
            code: 4704,
            message: "Not Found".to_string(),
        });
        assert_eq!(error.to_string(), "Ampache API error 4704: Not Found");
    }

    #[test]
    fn test_bridge_conversion_keeps_transport_class() {
        let timeout: AmpacheError = BridgeError::Timeout(Duration::from_secs(5)).into();
        assert!(timeout.is_transport());

        let other: AmpacheError = BridgeError::OperationFailed("HTTP 503 error".into()).into();
        assert!(!other.is_transport());
    }

    #[test]
    fn test_auth_conversion() {
        let auth: AuthError = AmpacheError::Fault(ApiFault {
            code: 401,
            message: "Invalid credentials".into(),
        })
        .into();
        assert_eq!(auth.code(), Some(401));
        assert!(!auth.is_recoverable());

        let auth: AuthError = AmpacheError::Transport("refused".into()).into();
        assert!(auth.is_recoverable());
    }
}
