//! Results of public sync operations
//!
//! No error crosses the orchestration boundary: every entry point returns a
//! [`SyncOutcome`]. A `Skipped` outcome means nothing was attempted, so
//! callers must not read "no error" as "synced".

use std::fmt;
use std::time::Duration;

use core_library::WaveId;

/// Summary of a completed operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub operation: &'static str,
    pub wave_id: Option<WaveId>,
    pub items_processed: u64,
    pub items_deleted: u64,
    /// Ids of the primary entities decoded, in response order
    pub ids: Vec<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The network monitor reports no connectivity
    Unreachable,
    /// No session and none could be established
    NotAuthenticated,
    /// The latest wave is done and the remote snapshot has not changed
    UpToDate,
    /// A full sync is already running
    AlreadyRunning,
    /// The server or the configuration does not support the operation
    Unsupported,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::Unreachable => "unreachable",
            SkipReason::NotAuthenticated => "not_authenticated",
            SkipReason::UpToDate => "up_to_date",
            SkipReason::AlreadyRunning => "already_running",
            SkipReason::Unsupported => "unsupported",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptReason {
    Cancelled,
    /// A request failed in transport
    Unreachable,
    /// Re-authentication failed mid-run
    SessionLost,
    /// Too many consecutive pages answered with an error envelope
    TooManyFaults,
    Failed(String),
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptReason::Cancelled => f.write_str("cancelled"),
            InterruptReason::Unreachable => f.write_str("unreachable"),
            InterruptReason::SessionLost => f.write_str("session_lost"),
            InterruptReason::TooManyFaults => f.write_str("too_many_faults"),
            InterruptReason::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Skipped(SkipReason),
    /// Stopped early; a full sync leaves its wave resumable
    Interrupted(InterruptReason),
}

impl SyncOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}
