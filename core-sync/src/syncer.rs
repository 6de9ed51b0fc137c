//! # Syncer
//!
//! Drives full and targeted synchronization against an Ampache server.
//!
//! ## Full Sync
//!
//! 1. Decide the wave: resume the latest unfinished one, or create a full,
//!    delta or migration wave (see [`crate::wave::decide`])
//! 2. Fetch genres serially when the wave starts fresh
//! 3. Paginate each phase in windows of pages fetched through a
//!    [`BatchPool`]; every page is decoded and committed in its own library
//!    context
//! 4. Advance the cursor over the contiguous prefix of committed pages and
//!    persist it after each page
//! 5. A page with zero decoded items completes the phase
//! 6. Before the wave reaches `Done`, sync playlists and (when supported)
//!    podcasts
//!
//! ## Targeted Sync
//!
//! Single entities, favorites, recent songs, search, podcasts, music folders
//! and directories are refreshed against the latest wave without creating
//! one. Each runs in one library context and reconciles deletions over the
//! subset it queried (see [`crate::reconcile`]).
//!
//! ## Failure Semantics
//!
//! Every entry point first checks reachability and the session. An
//! unreachable network or a missing session skips the operation silently.
//! Error envelopes are reported and skip the faulty page; a not-found
//! envelope for a single entity marks it deleted. Concurrent callers may
//! each trigger a re-authentication on an expired session.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bridge_traits::network::NetworkMonitor;
use core_auth::SessionManager;
use core_library::{
    Album, Artist, Directory, EntityKind, LibraryContext, LibraryContextExt, LibraryEntity,
    LibraryStore, MusicFolder, Podcast, PodcastEpisode, Song, WaveId,
};
use core_runtime::events::SyncEvent;
use provider_ampache::{Action, AmpacheClient, ApiFault, ApiRequest, XmlToken};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::SyncConfig;
use crate::decoder::{
    AlbumBuilder, ArtistBuilder, DecodeOutcome, DirectoryBuilder, EntityBuilder, EntityDecoder,
    GenreBuilder, MusicFolderBuilder, PodcastBuilder, PodcastEpisodeBuilder, SongBuilder,
};
use crate::observer::SyncObserver;
use crate::outcome::{InterruptReason, SkipReason, SyncOutcome, SyncReport};
use crate::pool::BatchPool;
use crate::reconcile::{
    available_ids, cascade_delete, clear_flag_missing, delete_missing, related_ids, set_flag,
    DeletionReport,
};
use crate::repository::SyncWaveRepository;
use crate::wave::{decide, SyncPhase, SyncWave, WaveDecision};
use crate::{Result, SyncError};

/// Entity kinds that carry a server-side favorite flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagKind {
    Artist,
    Album,
    Song,
}

impl FlagKind {
    /// Value of the `type` parameter for `stats` and `flag`
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagKind::Artist => "artist",
            FlagKind::Album => "album",
            FlagKind::Song => "song",
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            FlagKind::Artist => EntityKind::Artist,
            FlagKind::Album => EntityKind::Album,
            FlagKind::Song => EntityKind::Song,
        }
    }
}

/// Root browsed by [`Syncer::sync_directory`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseScope {
    MusicFolder(String),
    Directory(String),
}

impl BrowseScope {
    fn id(&self) -> &str {
        match self {
            BrowseScope::MusicFolder(id) | BrowseScope::Directory(id) => id,
        }
    }

    fn kind(&self) -> EntityKind {
        match self {
            BrowseScope::MusicFolder(_) => EntityKind::MusicFolder,
            BrowseScope::Directory(_) => EntityKind::Directory,
        }
    }

    fn browse_type(&self) -> &'static str {
        match self {
            BrowseScope::MusicFolder(_) => "catalog",
            BrowseScope::Directory(_) => "directory",
        }
    }
}

/// Running totals of one operation
#[derive(Debug, Default)]
pub(crate) struct Tally {
    pub(crate) wave_id: Option<WaveId>,
    pub(crate) processed: u64,
    pub(crate) ids: Vec<String>,
    pub(crate) deleted: DeletionReport,
}

impl Tally {
    pub(crate) fn new(wave_id: Option<WaveId>) -> Self {
        Self {
            wave_id,
            ..Default::default()
        }
    }

    /// Count a decode of the operation's primary entities
    pub(crate) fn record(&mut self, outcome: DecodeOutcome) {
        self.processed += outcome.parsed;
        self.ids.extend(outcome.ids);
    }

    fn absorb(&mut self, other: Tally) {
        self.processed += other.processed;
        self.deleted.merge(other.deleted);
    }
}

/// Requirement checked after reachability and authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Capability {
    Library,
    Podcasts,
}

enum PhaseEnd {
    Exhausted,
    Stopped(InterruptReason),
}

/// Authenticated request execution, shared with batch tasks
#[derive(Clone)]
pub(crate) struct Fetcher {
    client: AmpacheClient,
    session: Arc<SessionManager>,
    observer: SyncObserver,
}

impl Fetcher {
    async fn token(&self) -> Result<String> {
        self.session
            .token()
            .await
            .map_err(|_| SyncError::NotAuthenticated)
    }

    /// Execute a request, re-authenticating once on an expired session
    ///
    /// Error envelopes are reported and returned as `AmpacheError::Fault`.
    pub(crate) async fn fetch(&self, request: &ApiRequest) -> Result<Vec<XmlToken>> {
        let token = self.token().await?;
        let mut response = self.client.call(request, &token).await?;

        if response
            .fault
            .as_ref()
            .is_some_and(ApiFault::is_session_expired)
        {
            info!(action = %request.action, "Session expired, re-authenticating");
            self.session.invalidate().await;
            if !self.session.ensure_authenticated().await {
                return Err(SyncError::NotAuthenticated);
            }
            let token = self.token().await?;
            response = self.client.call(request, &token).await?;
        }

        if let Some(fault) = &response.fault {
            self.observer.remote_fault(request.action, fault);
        }
        Ok(response.into_result()?)
    }
}

/// One page of a phase, fetched and committed on its own task
struct PageBatch {
    fetcher: Fetcher,
    library: Arc<dyn LibraryStore>,
    observer: SyncObserver,
    request: ApiRequest,
    phase: SyncPhase,
    wave_id: WaveId,
}

impl PageBatch {
    async fn run(self) -> Result<u64> {
        let tokens = self.fetcher.fetch(&self.request).await?;
        let mut ctx = self.library.context().await?;

        let decoded = match self.phase {
            SyncPhase::Artists => self.decode(ArtistBuilder, &tokens, ctx.as_mut()).await,
            SyncPhase::Albums => self.decode(AlbumBuilder, &tokens, ctx.as_mut()).await,
            SyncPhase::Songs | SyncPhase::Done => {
                self.decode(SongBuilder, &tokens, ctx.as_mut()).await
            }
        };
        settle(ctx, decoded).await
    }

    async fn decode<B: EntityBuilder>(
        &self,
        builder: B,
        tokens: &[XmlToken],
        ctx: &mut dyn LibraryContext,
    ) -> Result<u64> {
        let mut decoder =
            EntityDecoder::new(builder, Some(self.wave_id)).with_observer(self.observer.clone());
        Ok(decoder.decode(tokens, ctx).await?.parsed)
    }
}

/// Commit on success, roll back on failure
pub(crate) async fn settle<T>(ctx: Box<dyn LibraryContext>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            ctx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = ctx.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

fn is_not_found(error: &SyncError) -> bool {
    error.fault().is_some_and(ApiFault::is_not_found)
}

/// Full and targeted synchronization
pub struct Syncer {
    pub(crate) fetcher: Fetcher,
    pub(crate) session: Arc<SessionManager>,
    pub(crate) library: Arc<dyn LibraryStore>,
    waves: Arc<dyn SyncWaveRepository>,
    network: Option<Arc<dyn NetworkMonitor>>,
    pub(crate) observer: SyncObserver,
    pub(crate) config: SyncConfig,
    running: Mutex<()>,
}

impl Syncer {
    pub fn new(
        client: AmpacheClient,
        session: Arc<SessionManager>,
        library: Arc<dyn LibraryStore>,
        waves: Arc<dyn SyncWaveRepository>,
        observer: SyncObserver,
        config: SyncConfig,
    ) -> Self {
        let client = client.with_timeout(config.request_timeout);
        Self {
            fetcher: Fetcher {
                client,
                session: Arc::clone(&session),
                observer: observer.clone(),
            },
            session,
            library,
            waves,
            network: None,
            observer,
            config,
            running: Mutex::new(()),
        }
    }

    /// Skip operations while the monitor reports no connectivity
    pub fn with_network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network = Some(monitor);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Most recent wave, finished or not
    pub async fn latest_wave(&self) -> Result<Option<SyncWave>> {
        self.waves.find_latest().await
    }

    // ========================================================================
    // Full Sync
    // ========================================================================

    /// Resume the unfinished wave or start a new one if the remote changed
    #[instrument(skip(self, cancel))]
    pub async fn full_sync(&self, cancel: &CancellationToken) -> SyncOutcome {
        self.run_full(false, cancel).await
    }

    /// Start a full version-migration wave once the latest wave is done
    #[instrument(skip(self, cancel))]
    pub async fn migrate(&self, cancel: &CancellationToken) -> SyncOutcome {
        self.run_full(true, cancel).await
    }

    async fn run_full(&self, migrate: bool, cancel: &CancellationToken) -> SyncOutcome {
        const OPERATION: &str = "full_sync";

        let Ok(_running) = self.running.try_lock() else {
            debug!("Full sync already running");
            return SyncOutcome::Skipped(SkipReason::AlreadyRunning);
        };
        if let Some(reason) = self.guard(Capability::Library).await {
            return SyncOutcome::Skipped(reason);
        }

        let started = Instant::now();
        let mut wave = match self.open_wave(migrate).await {
            Ok(Some(wave)) => wave,
            Ok(None) => {
                info!("Library up to date");
                return SyncOutcome::Skipped(SkipReason::UpToDate);
            }
            Err(e) => return self.interrupted(OPERATION, None, e),
        };

        let mut tally = Tally::new(Some(wave.id));
        match self.drive_wave(&mut wave, cancel, &mut tally).await {
            Ok(None) => self.completed(OPERATION, started, tally),
            Ok(Some(reason)) => {
                tally.deleted.emit(&self.observer);
                self.stopped(OPERATION, Some(wave.id), reason)
            }
            Err(e) => {
                tally.deleted.emit(&self.observer);
                self.interrupted(OPERATION, Some(wave.id), e)
            }
        }
    }

    async fn open_wave(&self, migrate: bool) -> Result<Option<SyncWave>> {
        let latest = self.waves.find_latest().await?;
        let snapshot = self.session.snapshot().await.unwrap_or_default();

        match decide(
            latest.as_ref(),
            &snapshot,
            migrate,
            self.config.schema_version,
        ) {
            WaveDecision::Resume(wave) => {
                info!(
                    wave_id = wave.id.0,
                    phase = %wave.phase,
                    cursor = wave.resume_cursor,
                    "Resuming sync wave"
                );
                self.observer.emit(SyncEvent::WaveResumed {
                    wave_id: wave.id.0,
                    phase: wave.phase.to_string(),
                    cursor: wave.resume_cursor,
                });
                Ok(Some(wave))
            }
            WaveDecision::Create { kind, delta_since } => {
                let mut wave =
                    SyncWave::new(kind, snapshot, self.config.schema_version, delta_since);
                wave.id = self.waves.insert(&wave).await?;
                info!(wave_id = wave.id.0, kind = %kind, delta = wave.is_delta(), "Sync wave started");
                self.observer.emit(SyncEvent::WaveStarted {
                    wave_id: wave.id.0,
                    kind: kind.to_string(),
                    delta: wave.is_delta(),
                });
                Ok(Some(wave))
            }
            WaveDecision::UpToDate => Ok(None),
        }
    }

    /// Run phases until `Done`; `Some(reason)` when stopped early
    async fn drive_wave(
        &self,
        wave: &mut SyncWave,
        cancel: &CancellationToken,
        tally: &mut Tally,
    ) -> Result<Option<InterruptReason>> {
        if wave.phase == SyncPhase::Artists && wave.resume_cursor == 0 {
            tally.processed += self.sync_genres(wave.id).await?;
        }

        while !wave.is_done() {
            if let PhaseEnd::Stopped(reason) = self.run_phase(wave, cancel, tally).await? {
                return Ok(Some(reason));
            }

            let from = wave.phase;
            if from.next(self.config.songs_phase) == Some(SyncPhase::Done) {
                self.run_trailing_stages(wave.id, tally).await?;
            }

            let to = wave.advance(self.config.songs_phase)?;
            self.waves.update(wave).await?;
            info!(wave_id = wave.id.0, from = %from, to = %to, "Sync phase changed");
            self.observer.emit(SyncEvent::PhaseChanged {
                wave_id: wave.id.0,
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        Ok(None)
    }

    async fn sync_genres(&self, wave_id: WaveId) -> Result<u64> {
        let mut ctx = self.library.context().await?;
        let mut decoder = self.decoder(GenreBuilder, Some(wave_id));
        let result = self
            .fetch_list(ctx.as_mut(), ApiRequest::new(Action::Genres), &mut decoder)
            .await;

        match settle(ctx, result).await {
            Ok(outcome) => Ok(outcome.parsed),
            // Reported by the fetcher; genres are also synthesized from references
            Err(e) if e.fault().is_some() => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn page_request(&self, wave: &SyncWave, offset: u64) -> ApiRequest {
        let action = match wave.phase {
            SyncPhase::Artists => Action::Artists,
            SyncPhase::Albums => Action::Albums,
            SyncPhase::Songs | SyncPhase::Done => Action::Songs,
        };
        let request = ApiRequest::new(action)
            .offset(offset)
            .limit(self.config.page_size);
        match wave.delta_since {
            Some(since) => request.added_since(since),
            None => request,
        }
    }

    /// Paginate the wave's current phase from its cursor until an empty page
    async fn run_phase(
        &self,
        wave: &mut SyncWave,
        cancel: &CancellationToken,
        tally: &mut Tally,
    ) -> Result<PhaseEnd> {
        let phase = wave.phase;
        let counts = self.session.remote_counts().await;
        let (kind, remote_total) = match phase {
            SyncPhase::Artists => (EntityKind::Artist, counts.artists),
            SyncPhase::Albums => (EntityKind::Album, counts.albums),
            SyncPhase::Songs | SyncPhase::Done => (EntityKind::Song, counts.songs),
        };
        // Progress only; termination never depends on remote counts
        let total = Some(remote_total).filter(|n| *n > 0);

        let page_size = self.config.page_size;
        let window = self.config.window() as u64;
        let pool = BatchPool::new(self.config.max_concurrent_batches);
        let mut processed = 0u64;
        let mut faults = 0u32;
        // Scheduling runs ahead of the persisted cursor across faulty pages
        let mut next = wave.resume_cursor;

        info!(wave_id = wave.id.0, phase = %phase, cursor = wave.resume_cursor, "Paginating phase");

        loop {
            if cancel.is_cancelled() {
                info!(wave_id = wave.id.0, phase = %phase, cursor = wave.resume_cursor, "Sync cancelled");
                return Ok(PhaseEnd::Stopped(InterruptReason::Cancelled));
            }

            let mut batches = Vec::with_capacity(window as usize);
            for index in 0..window {
                let offset = next + index * page_size;
                let batch = PageBatch {
                    fetcher: self.fetcher.clone(),
                    library: Arc::clone(&self.library),
                    observer: self.observer.clone(),
                    request: self.page_request(wave, offset),
                    phase,
                    wave_id: wave.id,
                };
                batches.push((offset, pool.spawn(batch.run()).await?));
            }
            pool.await_all_complete().await;
            next += window * page_size;

            // The cursor moves past faulty pages only once a later page
            // commits; a fault run that stops the phase resumes at its start
            for (offset, handle) in batches {
                let result = handle
                    .await
                    .map_err(|e| SyncError::TaskFailed(e.to_string()))?;

                match result {
                    Ok(0) => {
                        debug!(phase = %phase, offset, "Empty page, phase complete");
                        return Ok(PhaseEnd::Exhausted);
                    }
                    Ok(parsed) => {
                        faults = 0;
                        processed += parsed;
                        tally.processed += parsed;
                        wave.set_cursor(offset + page_size)?;
                        self.waves.update(wave).await?;
                        self.observer.page_committed(kind, processed, total);
                    }
                    Err(e) if e.fault().is_some() => {
                        faults += 1;
                        warn!(phase = %phase, offset, faults, "Skipping faulty page");
                        if faults > self.config.max_consecutive_faults {
                            warn!(
                                phase = %phase,
                                cursor = wave.resume_cursor,
                                "Too many consecutive faults, stopping phase"
                            );
                            return Ok(PhaseEnd::Stopped(InterruptReason::TooManyFaults));
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Playlists and podcasts, synced once per wave before it completes
    async fn run_trailing_stages(&self, wave_id: WaveId, tally: &mut Tally) -> Result<()> {
        match self.refresh_playlists(Some(wave_id)).await {
            Ok(stage) => tally.absorb(stage),
            Err(e) if e.fault().is_some() => warn!(error = %e, "Playlist stage skipped"),
            Err(e) => return Err(e),
        }

        if self.podcasts_enabled().await {
            match self.refresh_podcasts(Some(wave_id)).await {
                Ok(stage) => tally.absorb(stage),
                Err(e) if e.fault().is_some() => warn!(error = %e, "Podcast stage skipped"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // ========================================================================
    // Targeted Sync
    // ========================================================================

    /// Refresh one artist and its album list
    ///
    /// Albums previously linked to the artist but missing from the fresh list
    /// are marked deleted with their songs.
    #[instrument(skip(self))]
    pub async fn sync_artist(&self, artist_id: &str) -> SyncOutcome {
        self.targeted("artist", Capability::Library, self.refresh_artist(artist_id))
            .await
    }

    /// Refresh one album and its song list
    #[instrument(skip(self))]
    pub async fn sync_album(&self, album_id: &str) -> SyncOutcome {
        self.targeted("album", Capability::Library, self.refresh_album(album_id))
            .await
    }

    #[instrument(skip(self))]
    pub async fn sync_song(&self, song_id: &str) -> SyncOutcome {
        self.targeted("song", Capability::Library, self.refresh_song(song_id))
            .await
    }

    /// Refresh favorite flags of one kind
    ///
    /// Entities no longer flagged remotely get their local flag cleared.
    #[instrument(skip(self))]
    pub async fn sync_favorites(&self, kind: FlagKind) -> SyncOutcome {
        let work = async {
            match kind {
                FlagKind::Artist => {
                    self.refresh_flagged(
                        ArtistBuilder,
                        kind,
                        |artist: &Artist| artist.is_favorite,
                        |artist: &mut Artist, value| artist.is_favorite = value,
                    )
                    .await
                }
                FlagKind::Album => {
                    self.refresh_flagged(
                        AlbumBuilder,
                        kind,
                        |album: &Album| album.is_favorite,
                        |album: &mut Album, value| album.is_favorite = value,
                    )
                    .await
                }
                FlagKind::Song => {
                    self.refresh_flagged(
                        SongBuilder,
                        kind,
                        |song: &Song| song.is_favorite,
                        |song: &mut Song, value| song.is_favorite = value,
                    )
                    .await
                }
            }
        };
        self.targeted("favorites", Capability::Library, work).await
    }

    /// Refresh the server's newest songs and the recently-added flag
    #[instrument(skip(self))]
    pub async fn sync_recent_songs(&self) -> SyncOutcome {
        self.targeted("recent_songs", Capability::Library, self.refresh_recent())
            .await
    }

    /// Search songs remotely and add the matches to the library
    ///
    /// Additive only: nothing is reconciled. The report lists the matches.
    #[instrument(skip(self))]
    pub async fn search_songs(&self, query: &str) -> SyncOutcome {
        self.targeted("search", Capability::Library, self.search(query))
            .await
    }

    /// Refresh the podcast list
    #[instrument(skip(self))]
    pub async fn sync_podcasts(&self) -> SyncOutcome {
        let work = async {
            let wave_id = self.current_wave_id().await?;
            self.refresh_podcasts(wave_id).await
        };
        self.targeted("podcasts", Capability::Podcasts, work).await
    }

    #[instrument(skip(self))]
    pub async fn sync_podcast_episodes(&self, podcast_id: &str) -> SyncOutcome {
        self.targeted(
            "podcast_episodes",
            Capability::Podcasts,
            self.refresh_episodes(podcast_id),
        )
        .await
    }

    /// Refresh the catalogs exposed as music folders
    #[instrument(skip(self))]
    pub async fn sync_music_folders(&self) -> SyncOutcome {
        self.targeted("music_folders", Capability::Library, self.refresh_folders())
            .await
    }

    /// Refresh the directories and songs directly under a folder or directory
    #[instrument(skip(self))]
    pub async fn sync_directory(&self, scope: BrowseScope) -> SyncOutcome {
        self.targeted("directory", Capability::Library, self.refresh_directory(&scope))
            .await
    }

    /// Flag or unflag an entity as favorite, locally and remotely
    #[instrument(skip(self))]
    pub async fn set_favorite(&self, kind: FlagKind, id: &str, favorite: bool) -> SyncOutcome {
        self.targeted("flag", Capability::Library, self.flag(kind, id, favorite))
            .await
    }

    // ========================================================================
    // Operation Bodies
    // ========================================================================

    async fn refresh_artist(&self, artist_id: &str) -> Result<Tally> {
        let mut tally = Tally::new(self.current_wave_id().await?);
        let mut ctx = self.library.context().await?;
        let result = self.artist_in(ctx.as_mut(), artist_id, &mut tally).await;
        settle(ctx, result).await?;
        Ok(tally)
    }

    async fn artist_in(
        &self,
        ctx: &mut dyn LibraryContext,
        artist_id: &str,
        tally: &mut Tally,
    ) -> Result<()> {
        let request = ApiRequest::new(Action::Artist).filter(artist_id);
        let own = match self.fetch_entity(&request).await? {
            Some(tokens) => {
                self.decoder(ArtistBuilder, tally.wave_id)
                    .decode(&tokens, ctx)
                    .await?
            }
            None => DecodeOutcome::default(),
        };
        if own.is_empty() {
            return cascade_delete(ctx, EntityKind::Artist, artist_id, &mut tally.deleted).await;
        }
        tally.record(own);

        let before = related_ids::<Album>(ctx, EntityKind::Artist, artist_id).await?;
        let mut albums = self
            .decoder(AlbumBuilder, tally.wave_id)
            .with_link("artist", artist_id);
        let fetched = self
            .fetch_list(
                ctx,
                ApiRequest::new(Action::ArtistAlbums).filter(artist_id),
                &mut albums,
            )
            .await?;

        tally.processed += fetched.parsed;
        delete_missing(
            ctx,
            EntityKind::Album,
            &before,
            &fetched.id_set(),
            &mut tally.deleted,
        )
        .await
    }

    async fn refresh_album(&self, album_id: &str) -> Result<Tally> {
        let mut tally = Tally::new(self.current_wave_id().await?);
        let mut ctx = self.library.context().await?;
        let result = self.album_in(ctx.as_mut(), album_id, &mut tally).await;
        settle(ctx, result).await?;
        Ok(tally)
    }

    async fn album_in(
        &self,
        ctx: &mut dyn LibraryContext,
        album_id: &str,
        tally: &mut Tally,
    ) -> Result<()> {
        let request = ApiRequest::new(Action::Album).filter(album_id);
        let own = match self.fetch_entity(&request).await? {
            Some(tokens) => {
                self.decoder(AlbumBuilder, tally.wave_id)
                    .decode(&tokens, ctx)
                    .await?
            }
            None => DecodeOutcome::default(),
        };
        if own.is_empty() {
            return cascade_delete(ctx, EntityKind::Album, album_id, &mut tally.deleted).await;
        }
        tally.record(own);

        let before = related_ids::<Song>(ctx, EntityKind::Album, album_id).await?;
        let mut songs = self
            .decoder(SongBuilder, tally.wave_id)
            .with_link("album", album_id);
        let fetched = self
            .fetch_list(
                ctx,
                ApiRequest::new(Action::AlbumSongs).filter(album_id),
                &mut songs,
            )
            .await?;

        tally.processed += fetched.parsed;
        delete_missing(
            ctx,
            EntityKind::Song,
            &before,
            &fetched.id_set(),
            &mut tally.deleted,
        )
        .await
    }

    async fn refresh_song(&self, song_id: &str) -> Result<Tally> {
        let mut tally = Tally::new(self.current_wave_id().await?);
        let mut ctx = self.library.context().await?;
        let result = async {
            let request = ApiRequest::new(Action::Song).filter(song_id);
            let own = match self.fetch_entity(&request).await? {
                Some(tokens) => {
                    self.decoder(SongBuilder, tally.wave_id)
                        .decode(&tokens, ctx.as_mut())
                        .await?
                }
                None => DecodeOutcome::default(),
            };
            if own.is_empty() {
                cascade_delete(ctx.as_mut(), EntityKind::Song, song_id, &mut tally.deleted)
                    .await?;
            } else {
                tally.record(own);
            }
            Ok::<_, SyncError>(())
        }
        .await;
        settle(ctx, result).await?;
        Ok(tally)
    }

    async fn refresh_flagged<B: EntityBuilder>(
        &self,
        builder: B,
        kind: FlagKind,
        get: fn(&B::Entity) -> bool,
        set: fn(&mut B::Entity, bool),
    ) -> Result<Tally> {
        let mut tally = Tally::new(self.current_wave_id().await?);
        let mut ctx = self.library.context().await?;
        let mut decoder = self.decoder(builder, tally.wave_id);
        let request = ApiRequest::new(Action::Stats)
            .param("type", kind.as_str())
            .filter("flagged");

        let result = async {
            let fetched = self.fetch_list(ctx.as_mut(), request, &mut decoder).await?;
            set_flag::<B::Entity>(ctx.as_mut(), &fetched.ids, set).await?;
            let cleared =
                clear_flag_missing::<B::Entity>(ctx.as_mut(), &fetched.id_set(), get, set).await?;
            debug!(kind = kind.as_str(), flagged = fetched.parsed, cleared, "Favorites refreshed");
            Ok::<_, SyncError>(fetched)
        }
        .await;

        tally.record(settle(ctx, result).await?);
        Ok(tally)
    }

    async fn refresh_recent(&self) -> Result<Tally> {
        let mut tally = Tally::new(self.current_wave_id().await?);
        let mut ctx = self.library.context().await?;
        let request = ApiRequest::new(Action::Stats)
            .param("type", "song")
            .filter("newest")
            .limit(self.config.page_size);

        let result = async {
            let tokens = self.fetcher.fetch(&request).await?;
            let fetched = self
                .decoder(SongBuilder, tally.wave_id)
                .decode(&tokens, ctx.as_mut())
                .await?;
            set_flag::<Song>(ctx.as_mut(), &fetched.ids, |song, value| {
                song.is_recently_added = value
            })
            .await?;
            clear_flag_missing::<Song>(
                ctx.as_mut(),
                &fetched.id_set(),
                |song| song.is_recently_added,
                |song, value| song.is_recently_added = value,
            )
            .await?;
            Ok::<_, SyncError>(fetched)
        }
        .await;

        tally.record(settle(ctx, result).await?);
        Ok(tally)
    }

    async fn search(&self, query: &str) -> Result<Tally> {
        let mut tally = Tally::new(self.current_wave_id().await?);
        let mut ctx = self.library.context().await?;
        let request = ApiRequest::new(Action::SearchSongs)
            .filter(query)
            .limit(self.config.page_size);

        let result = async {
            let tokens = self.fetcher.fetch(&request).await?;
            self.decoder(SongBuilder, tally.wave_id)
                .decode(&tokens, ctx.as_mut())
                .await
        }
        .await;

        tally.record(settle(ctx, result).await?);
        Ok(tally)
    }

    pub(crate) async fn refresh_podcasts(&self, wave_id: Option<WaveId>) -> Result<Tally> {
        let mut tally = Tally::new(wave_id);
        let mut ctx = self.library.context().await?;

        let result = async {
            let before = available_ids::<Podcast>(ctx.as_mut()).await?;
            let mut decoder = self.decoder(PodcastBuilder, wave_id);
            let fetched = self
                .fetch_list(ctx.as_mut(), ApiRequest::new(Action::Podcasts), &mut decoder)
                .await?;
            delete_missing(
                ctx.as_mut(),
                EntityKind::Podcast,
                &before,
                &fetched.id_set(),
                &mut tally.deleted,
            )
            .await?;
            Ok::<_, SyncError>(fetched)
        }
        .await;

        tally.record(settle(ctx, result).await?);
        Ok(tally)
    }

    async fn refresh_episodes(&self, podcast_id: &str) -> Result<Tally> {
        let mut tally = Tally::new(self.current_wave_id().await?);
        let mut ctx = self.library.context().await?;

        let result = async {
            let before =
                related_ids::<PodcastEpisode>(ctx.as_mut(), EntityKind::Podcast, podcast_id)
                    .await?;
            let mut decoder = self
                .decoder(PodcastEpisodeBuilder, tally.wave_id)
                .with_link("podcast", podcast_id);
            let request = ApiRequest::new(Action::PodcastEpisodes).filter(podcast_id);

            match self.fetch_list(ctx.as_mut(), request, &mut decoder).await {
                Ok(fetched) => {
                    delete_missing(
                        ctx.as_mut(),
                        EntityKind::PodcastEpisode,
                        &before,
                        &fetched.id_set(),
                        &mut tally.deleted,
                    )
                    .await?;
                    tally.record(fetched);
                    Ok::<_, SyncError>(())
                }
                Err(e) if is_not_found(&e) => {
                    cascade_delete(
                        ctx.as_mut(),
                        EntityKind::Podcast,
                        podcast_id,
                        &mut tally.deleted,
                    )
                    .await
                }
                Err(e) => Err(e),
            }
        }
        .await;

        settle(ctx, result).await?;
        Ok(tally)
    }

    async fn refresh_folders(&self) -> Result<Tally> {
        let mut tally = Tally::new(self.current_wave_id().await?);
        let mut ctx = self.library.context().await?;

        let result = async {
            let before = available_ids::<MusicFolder>(ctx.as_mut()).await?;
            let mut decoder = self.decoder(MusicFolderBuilder, tally.wave_id);
            let fetched = self
                .fetch_list(ctx.as_mut(), ApiRequest::new(Action::Catalogs), &mut decoder)
                .await?;
            delete_missing(
                ctx.as_mut(),
                EntityKind::MusicFolder,
                &before,
                &fetched.id_set(),
                &mut tally.deleted,
            )
            .await?;
            Ok::<_, SyncError>(fetched)
        }
        .await;

        tally.record(settle(ctx, result).await?);
        Ok(tally)
    }

    async fn refresh_directory(&self, scope: &BrowseScope) -> Result<Tally> {
        let mut tally = Tally::new(self.current_wave_id().await?);
        let mut ctx = self.library.context().await?;
        let result = self.directory_in(ctx.as_mut(), scope, &mut tally).await;
        settle(ctx, result).await?;
        Ok(tally)
    }

    async fn directory_in(
        &self,
        ctx: &mut dyn LibraryContext,
        scope: &BrowseScope,
        tally: &mut Tally,
    ) -> Result<()> {
        let id = scope.id();

        let mut directories = self.decoder(DirectoryBuilder, tally.wave_id);
        let mut songs = self.decoder(SongBuilder, tally.wave_id);
        let (dirs_before, songs_before) = match scope {
            BrowseScope::MusicFolder(_) => {
                let top_level = ctx
                    .list_related::<Directory>(EntityKind::MusicFolder, id)
                    .await?
                    .into_iter()
                    .filter(|directory| directory.parent_id.is_none())
                    .map(|directory| directory.id)
                    .collect();
                directories = directories.with_link("catalog", id);
                (top_level, HashSet::new())
            }
            BrowseScope::Directory(_) => {
                let folder = ctx
                    .get_record::<Directory>(id)
                    .await?
                    .and_then(|directory| directory.music_folder_id);
                if let Some(folder) = folder {
                    directories = directories.with_link("catalog", folder);
                }
                directories = directories.with_link("parent", id);
                songs = songs.with_link("directory", id);
                (
                    related_ids::<Directory>(ctx, EntityKind::Directory, id).await?,
                    related_ids::<Song>(ctx, EntityKind::Directory, id).await?,
                )
            }
        };

        let request = ApiRequest::new(Action::Browse)
            .filter(id)
            .param("type", scope.browse_type());
        let mut seen = HashSet::new();
        let mut parsed_dirs = DecodeOutcome::default();
        let mut parsed_songs = DecodeOutcome::default();
        let mut offset = 0;

        loop {
            let page = request.clone().offset(offset).limit(self.config.page_size);
            let tokens = match self.fetcher.fetch(&page).await {
                Ok(tokens) => tokens,
                Err(e) if is_not_found(&e) && offset == 0 => {
                    return cascade_delete(ctx, scope.kind(), id, &mut tally.deleted).await;
                }
                Err(e) => return Err(e),
            };

            let dirs = directories.decode(&tokens, ctx).await?;
            let tracks = songs.decode(&tokens, ctx).await?;
            let fresh = dirs
                .ids
                .iter()
                .chain(tracks.ids.iter())
                .filter(|id| seen.insert((*id).clone()))
                .count();
            if fresh == 0 {
                break;
            }

            parsed_dirs.merge(dirs);
            parsed_songs.merge(tracks);
            offset += self.config.page_size;
        }

        delete_missing(
            ctx,
            EntityKind::Directory,
            &dirs_before,
            &parsed_dirs.id_set(),
            &mut tally.deleted,
        )
        .await?;
        delete_missing(
            ctx,
            EntityKind::Song,
            &songs_before,
            &parsed_songs.id_set(),
            &mut tally.deleted,
        )
        .await?;

        tally.processed += parsed_dirs.parsed;
        tally.record(parsed_songs);
        Ok(())
    }

    async fn flag(&self, kind: FlagKind, id: &str, favorite: bool) -> Result<Tally> {
        let request = ApiRequest::new(Action::Flag)
            .param("type", kind.as_str())
            .param("id", id)
            .param("flag", u8::from(favorite));
        self.fetcher.fetch(&request).await?;

        let mut ctx = self.library.context().await?;
        let result = async {
            let Some(mut entity) = ctx.get(kind.entity_kind(), id).await? else {
                return Ok(0);
            };
            match &mut entity {
                LibraryEntity::Artist(artist) => artist.is_favorite = favorite,
                LibraryEntity::Album(album) => album.is_favorite = favorite,
                LibraryEntity::Song(song) => song.is_favorite = favorite,
                _ => return Ok(0),
            }
            ctx.save(entity).await?;
            Ok::<_, SyncError>(1)
        }
        .await;

        let mut tally = Tally::new(self.current_wave_id().await?);
        tally.processed = settle(ctx, result).await?;
        tally.ids.push(id.to_string());
        Ok(tally)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Skip reason, if the operation must not run
    pub(crate) async fn guard(&self, capability: Capability) -> Option<SkipReason> {
        if let Some(network) = &self.network {
            if !network.is_connected().await {
                debug!("Network unreachable, skipping");
                return Some(SkipReason::Unreachable);
            }
        }
        if !self.session.ensure_authenticated().await {
            debug!("No session, skipping");
            return Some(SkipReason::NotAuthenticated);
        }
        if capability == Capability::Podcasts && !self.podcasts_enabled().await {
            debug!("Podcasts unsupported, skipping");
            return Some(SkipReason::Unsupported);
        }
        None
    }

    async fn podcasts_enabled(&self) -> bool {
        self.config.enable_podcasts && self.session.supports_podcasts().await
    }

    pub(crate) async fn targeted<F>(
        &self,
        operation: &'static str,
        capability: Capability,
        work: F,
    ) -> SyncOutcome
    where
        F: Future<Output = Result<Tally>>,
    {
        let started = Instant::now();
        if let Some(reason) = self.guard(capability).await {
            return SyncOutcome::Skipped(reason);
        }
        match work.await {
            Ok(tally) => self.completed(operation, started, tally),
            Err(e) => self.interrupted(operation, None, e),
        }
    }

    pub(crate) async fn current_wave_id(&self) -> Result<Option<WaveId>> {
        Ok(self.waves.find_latest().await?.map(|wave| wave.id))
    }

    pub(crate) fn decoder<B: EntityBuilder>(
        &self,
        builder: B,
        wave_id: Option<WaveId>,
    ) -> EntityDecoder<B> {
        EntityDecoder::new(builder, wave_id).with_observer(self.observer.clone())
    }

    /// Fetch a single-entity action; `None` when the server reports it gone
    async fn fetch_entity(&self, request: &ApiRequest) -> Result<Option<Vec<XmlToken>>> {
        match self.fetcher.fetch(request).await {
            Ok(tokens) => Ok(Some(tokens)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch every page of a list action, decoding into `ctx`
    ///
    /// Stops at the first page that parses nothing or yields no id not
    /// already seen. Only for lists of distinct entities; playlist tracks
    /// repeat ids and page on their own.
    pub(crate) async fn fetch_list<B: EntityBuilder>(
        &self,
        ctx: &mut dyn LibraryContext,
        request: ApiRequest,
        decoder: &mut EntityDecoder<B>,
    ) -> Result<DecodeOutcome> {
        let mut total = DecodeOutcome::default();
        let mut seen = HashSet::new();
        let mut offset = 0;

        loop {
            let page = request.clone().offset(offset).limit(self.config.page_size);
            let tokens = self.fetcher.fetch(&page).await?;
            let outcome = decoder.decode(&tokens, ctx).await?;
            if outcome.parsed == 0 {
                return Ok(total);
            }

            let fresh = outcome
                .ids
                .iter()
                .filter(|id| seen.insert((*id).clone()))
                .count();
            if fresh == 0 {
                return Ok(total);
            }
            total.merge(outcome);
            offset += self.config.page_size;
        }
    }

    pub(crate) fn completed(
        &self,
        operation: &'static str,
        started: Instant,
        tally: Tally,
    ) -> SyncOutcome {
        tally.deleted.emit(&self.observer);

        let report = SyncReport {
            operation,
            wave_id: tally.wave_id,
            items_processed: tally.processed,
            items_deleted: tally.deleted.total(),
            ids: tally.ids,
            duration: started.elapsed(),
        };
        info!(
            operation,
            processed = report.items_processed,
            deleted = report.items_deleted,
            duration_ms = report.duration.as_millis() as u64,
            "Sync operation completed"
        );
        self.observer.emit(SyncEvent::Completed {
            operation: operation.to_string(),
            wave_id: report.wave_id.map(|id| id.0),
            items_processed: report.items_processed,
            items_deleted: report.items_deleted,
            duration_ms: report.duration.as_millis() as u64,
        });
        SyncOutcome::Completed(report)
    }

    pub(crate) fn interrupted(
        &self,
        operation: &'static str,
        wave_id: Option<WaveId>,
        error: SyncError,
    ) -> SyncOutcome {
        let reason = match &error {
            SyncError::Cancelled => InterruptReason::Cancelled,
            SyncError::NotAuthenticated => InterruptReason::SessionLost,
            e if e.is_transport() => InterruptReason::Unreachable,
            e => InterruptReason::Failed(e.to_string()),
        };
        self.observer.error(operation, &error);
        self.stopped(operation, wave_id, reason)
    }

    fn stopped(
        &self,
        operation: &'static str,
        wave_id: Option<WaveId>,
        reason: InterruptReason,
    ) -> SyncOutcome {
        info!(operation, reason = %reason, "Sync operation interrupted");
        self.observer.emit(SyncEvent::Interrupted {
            operation: operation.to_string(),
            wave_id: wave_id.map(|id| id.0),
            reason: reason.to_string(),
        });
        SyncOutcome::Interrupted(reason)
    }
}
