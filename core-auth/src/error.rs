use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Handshake with {server} failed: {reason}")]
    HandshakeFailed { server: String, reason: String },

    #[error("Server rejected credentials (code {code}): {message}")]
    Rejected { code: u32, message: String },

    #[error("Server unreachable: {0}")]
    Transport(String),

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Stored credentials are corrupted: {0}")]
    CredentialsCorrupted(String),

    #[error("No credentials available")]
    NoCredentials,

    #[error("Not authenticated")]
    NotAuthenticated,
}

impl AuthError {
    /// Remote error code, when the server answered with one
    pub fn code(&self) -> Option<u32> {
        match self {
            AuthError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether retrying later with the same credentials can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AuthError::Transport(_) | AuthError::HandshakeFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
