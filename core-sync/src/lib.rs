//! # Sync Module
//!
//! Incremental library synchronization against an Ampache server.
//!
//! ## Overview
//!
//! A full sync walks the remote catalog phase by phase (artists, albums,
//! optionally songs) inside a persisted [`SyncWave`]. Progress is saved after
//! every committed page, so a crash or cancellation resumes where it left off.
//! Targeted syncs refresh one slice of the library against the latest wave and
//! reconcile remote deletions over what they queried.
//!
//! ## Components
//!
//! - **Sync Wave** (`wave`): phase state machine and the resume/create decision
//! - **Repository** (`repository`): SQLite persistence for waves
//! - **Decoder** (`decoder`): token-stream decoding into library entities with
//!   reference resolution
//! - **Batch Pool** (`pool`): bounded concurrency for page fetches
//! - **Reconciliation** (`reconcile`): set-difference deletion with cascades
//! - **Syncer** (`syncer`, `playlist`): full and targeted operations
//! - **Observer** (`observer`): progress callbacks, fault reporting and events
//! - **Bootstrap** (`bootstrap`): wiring from a runtime `CoreConfig`

pub mod bootstrap;
pub mod config;
pub mod decoder;
pub mod error;
pub mod observer;
pub mod outcome;
pub mod playlist;
pub mod pool;
pub mod reconcile;
pub mod repository;
pub mod syncer;
pub mod wave;

pub use bootstrap::SyncRuntime;
pub use config::{SongsPhase, SyncConfig, SCHEMA_VERSION};
pub use decoder::{DecodeOutcome, EntityBuilder, EntityDecoder};
pub use error::{Result, SyncError};
pub use observer::{ErrorReporter, ProgressListener, SyncObserver};
pub use outcome::{InterruptReason, SkipReason, SyncOutcome, SyncReport};
pub use playlist::PlaylistChange;
pub use pool::{BatchPool, PoolCounters, SlotPermit};
pub use reconcile::DeletionReport;
pub use repository::{SqliteSyncWaveRepository, SyncWaveRepository};
pub use syncer::{BrowseScope, FlagKind, Syncer};
pub use wave::{decide, SyncPhase, SyncWave, WaveDecision, WaveKind};
