//! Sync engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Current schema version of synchronized data
///
/// Bumping it makes the next sync run a version-migration wave.
pub const SCHEMA_VERSION: u32 = 1;

/// Whether a full wave paginates songs after albums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SongsPhase {
    /// Complete straight from albums; songs arrive through album syncs
    #[default]
    Skip,
    /// Run a songs pagination loop before completing
    Paginate,
}

/// Configuration for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of page fetches in flight during a phase
    pub max_concurrent_batches: usize,
    /// Entities requested per page
    pub page_size: u64,
    /// Fetch a window of pages concurrently instead of one at a time
    pub parallel_batches: bool,
    pub songs_phase: SongsPhase,
    /// Consecutive faulty pages tolerated before a run is interrupted
    pub max_consecutive_faults: u32,
    pub schema_version: u32,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Fetch podcasts when the server supports them
    pub enable_podcasts: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 5,
            page_size: 500,
            parallel_batches: true,
            songs_phase: SongsPhase::default(),
            max_consecutive_faults: 3,
            schema_version: SCHEMA_VERSION,
            request_timeout: Duration::from_secs(30),
            enable_podcasts: true,
        }
    }
}

impl SyncConfig {
    /// Number of pages fetched per window
    pub fn window(&self) -> usize {
        if self.parallel_batches {
            self.max_concurrent_batches.max(1)
        } else {
            1
        }
    }
}
