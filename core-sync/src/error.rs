use core_library::LibraryError;
use provider_ampache::{AmpacheError, ApiFault};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync wave {wave_id} not found")]
    WaveNotFound { wave_id: i64 },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid sync phase: {0}")]
    InvalidPhase(String),

    #[error("Invalid wave kind: {0}")]
    InvalidWaveKind(String),

    #[error("Provider error: {0}")]
    Provider(#[from] AmpacheError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Batch task failed: {0}")]
    TaskFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl SyncError {
    /// Connectivity failure talking to the server
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Provider(e) if e.is_transport())
    }

    /// Error envelope returned by the server, if that is what failed
    pub fn fault(&self) -> Option<&ApiFault> {
        match self {
            SyncError::Provider(e) => e.fault(),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(error: sqlx::Error) -> Self {
        SyncError::Database(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
