//! # Sync-Wave State Machine
//!
//! A wave is one end-to-end synchronization attempt. It is persisted so an
//! interrupted run resumes where it stopped instead of starting over.
//!
//! ## State Machine
//!
//! ```text
//! Artists → Albums → Songs → Done
//!              └──────────────↑   (SongsPhase::Skip)
//! ```
//!
//! Every phase change resets `resume_cursor` to 0. `Done` is terminal.
//!
//! ## Wave Decisions
//!
//! On start the engine looks at the most recent wave:
//! - not `Done`: resume it at `(phase, resume_cursor)`
//! - `Done`, migration requested: new full migration wave
//! - `Done`, remote `add` timestamp changed: new delta wave fetching only
//!   entities added since the previous wave's snapshot
//! - otherwise: nothing to do

use chrono::{DateTime, Utc};
use core_auth::ChangeSnapshot;
use core_library::WaveId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::SongsPhase;
use crate::{Result, SyncError};

/// Pagination phase of a wave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Artists,
    Albums,
    Songs,
    Done,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Artists => "artists",
            SyncPhase::Albums => "albums",
            SyncPhase::Songs => "songs",
            SyncPhase::Done => "done",
        }
    }

    /// Phase following this one under the given songs policy
    pub fn next(&self, songs: SongsPhase) -> Option<SyncPhase> {
        match (self, songs) {
            (SyncPhase::Artists, _) => Some(SyncPhase::Albums),
            (SyncPhase::Albums, SongsPhase::Paginate) => Some(SyncPhase::Songs),
            (SyncPhase::Albums, SongsPhase::Skip) => Some(SyncPhase::Done),
            (SyncPhase::Songs, _) => Some(SyncPhase::Done),
            (SyncPhase::Done, _) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Done)
    }
}

impl FromStr for SyncPhase {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "artists" => Ok(SyncPhase::Artists),
            "albums" => Ok(SyncPhase::Albums),
            "songs" => Ok(SyncPhase::Songs),
            "done" => Ok(SyncPhase::Done),
            _ => Err(SyncError::InvalidPhase(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a wave was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveKind {
    Normal,
    /// Full re-sync after a schema version change
    Migration,
}

impl WaveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaveKind::Normal => "normal",
            WaveKind::Migration => "migration",
        }
    }
}

impl FromStr for WaveKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(WaveKind::Normal),
            "migration" => Ok(WaveKind::Migration),
            _ => Err(SyncError::InvalidWaveKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for WaveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted synchronization attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWave {
    /// Assigned by the repository on insert; `WaveId(0)` before that
    pub id: WaveId,
    pub kind: WaveKind,
    pub phase: SyncPhase,
    /// Pagination offset into the current phase
    pub resume_cursor: u64,
    pub schema_version: u32,
    /// Remote change timestamps captured when the wave was created
    pub snapshot: ChangeSnapshot,
    /// Only fetch entities added after this instant
    pub delta_since: Option<DateTime<Utc>>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SyncWave {
    pub fn new(
        kind: WaveKind,
        snapshot: ChangeSnapshot,
        schema_version: u32,
        delta_since: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: WaveId(0),
            kind,
            phase: SyncPhase::Artists,
            resume_cursor: 0,
            schema_version,
            snapshot,
            delta_since,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn is_delta(&self) -> bool {
        self.delta_since.is_some()
    }

    /// Record pagination progress within the current phase
    ///
    /// # Errors
    ///
    /// Returns an error if the wave is already `Done`
    pub fn set_cursor(&mut self, cursor: u64) -> Result<()> {
        if self.is_done() {
            return Err(SyncError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: "set_cursor".to_string(),
                reason: "A finished wave has no cursor".to_string(),
            });
        }
        self.resume_cursor = cursor;
        self.touch();
        Ok(())
    }

    /// Move to the next phase, resetting the cursor
    ///
    /// # Errors
    ///
    /// Returns an error if the wave is already `Done`
    pub fn advance(&mut self, songs: SongsPhase) -> Result<SyncPhase> {
        let next = self
            .phase
            .next(songs)
            .ok_or_else(|| SyncError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: "next".to_string(),
                reason: "Done is terminal".to_string(),
            })?;
        self.phase = next;
        self.resume_cursor = 0;
        self.touch();
        Ok(next)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp();
    }
}

/// What the engine should do with the wave history
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaveDecision {
    Resume(SyncWave),
    Create {
        kind: WaveKind,
        delta_since: Option<DateTime<Utc>>,
    },
    UpToDate,
}

/// Decide between resuming, creating a wave or doing nothing
///
/// A version-migration wave is forced when `migrate` is set or the latest
/// wave was written under an older schema version.
pub fn decide(
    latest: Option<&SyncWave>,
    snapshot: &ChangeSnapshot,
    migrate: bool,
    schema_version: u32,
) -> WaveDecision {
    let Some(latest) = latest else {
        return WaveDecision::Create {
            kind: WaveKind::Normal,
            delta_since: None,
        };
    };

    if !latest.is_done() {
        return WaveDecision::Resume(latest.clone());
    }

    if migrate || latest.schema_version < schema_version {
        return WaveDecision::Create {
            kind: WaveKind::Migration,
            delta_since: None,
        };
    }

    if snapshot.add != latest.snapshot.add {
        return WaveDecision::Create {
            kind: WaveKind::Normal,
            delta_since: latest.snapshot.add,
        };
    }

    WaveDecision::UpToDate
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap())
    }

    fn snapshot(add_day: u32) -> ChangeSnapshot {
        ChangeSnapshot {
            update: at(add_day),
            add: at(add_day),
            clean: None,
        }
    }

    fn done_wave(add_day: u32) -> SyncWave {
        let mut wave = SyncWave::new(WaveKind::Normal, snapshot(add_day), 1, None);
        wave.phase = SyncPhase::Done;
        wave
    }

    #[test]
    fn test_phase_round_trip() {
        for phase in [
            SyncPhase::Artists,
            SyncPhase::Albums,
            SyncPhase::Songs,
            SyncPhase::Done,
        ] {
            assert_eq!(phase.as_str().parse::<SyncPhase>().unwrap(), phase);
        }
        assert!("tracks".parse::<SyncPhase>().is_err());
        assert_eq!("migration".parse::<WaveKind>().unwrap(), WaveKind::Migration);
    }

    #[test]
    fn test_advance_resets_cursor() {
        let mut wave = SyncWave::new(WaveKind::Normal, ChangeSnapshot::default(), 1, None);
        wave.set_cursor(1500).unwrap();

        assert_eq!(wave.advance(SongsPhase::Skip).unwrap(), SyncPhase::Albums);
        assert_eq!(wave.resume_cursor, 0);

        wave.set_cursor(120).unwrap();
        assert_eq!(wave.advance(SongsPhase::Skip).unwrap(), SyncPhase::Done);
        assert_eq!(wave.resume_cursor, 0);
        assert!(wave.is_done());
    }

    #[test]
    fn test_paginated_songs_phase() {
        let mut wave = SyncWave::new(WaveKind::Normal, ChangeSnapshot::default(), 1, None);
        wave.advance(SongsPhase::Paginate).unwrap();
        assert_eq!(wave.advance(SongsPhase::Paginate).unwrap(), SyncPhase::Songs);
        assert_eq!(wave.advance(SongsPhase::Skip).unwrap(), SyncPhase::Done);
    }

    #[test]
    fn test_done_is_terminal() {
        let mut wave = done_wave(1);
        assert!(matches!(
            wave.advance(SongsPhase::Skip),
            Err(SyncError::InvalidStateTransition { .. })
        ));
        assert!(wave.set_cursor(10).is_err());
    }

    #[test]
    fn test_first_wave_is_full() {
        assert_eq!(
            decide(None, &snapshot(1), false, 1),
            WaveDecision::Create {
                kind: WaveKind::Normal,
                delta_since: None
            }
        );
    }

    #[test]
    fn test_unfinished_wave_is_resumed() {
        let mut wave = SyncWave::new(WaveKind::Normal, snapshot(1), 1, None);
        wave.phase = SyncPhase::Albums;
        wave.resume_cursor = 120;

        // Even a migration request waits for the running wave
        match decide(Some(&wave), &snapshot(2), true, 2) {
            WaveDecision::Resume(resumed) => {
                assert_eq!(resumed.phase, SyncPhase::Albums);
                assert_eq!(resumed.resume_cursor, 120);
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn test_changed_add_creates_delta_wave() {
        let latest = done_wave(1);
        assert_eq!(
            decide(Some(&latest), &snapshot(2), false, 1),
            WaveDecision::Create {
                kind: WaveKind::Normal,
                delta_since: at(1)
            }
        );
    }

    #[test]
    fn test_unchanged_snapshot_is_up_to_date() {
        let latest = done_wave(1);
        assert_eq!(
            decide(Some(&latest), &snapshot(1), false, 1),
            WaveDecision::UpToDate
        );
    }

    #[test]
    fn test_migration_wave() {
        let latest = done_wave(1);
        let expected = WaveDecision::Create {
            kind: WaveKind::Migration,
            delta_since: None,
        };
        assert_eq!(decide(Some(&latest), &snapshot(1), true, 1), expected);
        // Older schema forces migration without an explicit request
        assert_eq!(decide(Some(&latest), &snapshot(1), false, 2), expected);
    }
}
