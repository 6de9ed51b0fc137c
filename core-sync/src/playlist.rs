//! # Playlist Sync
//!
//! Playlists sync in both directions:
//!
//! - **Download** rewrites a playlist's local items from `playlist_songs`.
//!   Remote positions are 1-based; local items are ordered `0..n-1` and
//!   anything beyond the parsed count is dropped.
//! - **Upload** applies one [`PlaylistChange`] locally, commits it, then issues
//!   exactly one remote call for it. Reorders send the whole item list.

use std::collections::HashSet;
use std::time::Instant;

use core_library::{
    EntityKind, LibraryContext, LibraryContextExt, Playlist, RemoteStatus, WaveId,
};
use core_runtime::events::{CoreEvent, LibraryEvent};
use provider_ampache::{Action, ApiRequest};
use tracing::{debug, info, instrument};

use crate::decoder::{DecodeOutcome, PlaylistBuilder, PlaylistTrackBuilder};
use crate::outcome::SyncOutcome;
use crate::reconcile::{available_ids, cascade_delete, delete_missing};
use crate::syncer::{settle, Capability, Syncer, Tally};
use crate::{Result, SyncError};

/// A local edit to upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistChange {
    /// Append a song
    AddSong(String),
    /// Remove the item at a 0-based index
    RemoveAt(usize),
    Rename(String),
    /// Move the item at `from` to `to`, both 0-based
    Move { from: usize, to: usize },
}

impl PlaylistChange {
    fn change_type(&self) -> &'static str {
        match self {
            PlaylistChange::AddSong(_) => "songs_added",
            PlaylistChange::RemoveAt(_) => "song_removed",
            PlaylistChange::Rename(_) => "renamed",
            PlaylistChange::Move { .. } => "reordered",
        }
    }

    /// Apply to the local copy; `false` if the change does not fit the playlist
    fn apply(&self, playlist: &mut Playlist) -> bool {
        match self {
            PlaylistChange::AddSong(song_id) => {
                playlist.add_songs([song_id.as_str()]);
                true
            }
            PlaylistChange::RemoveAt(index) => playlist.remove_at(*index).is_some(),
            PlaylistChange::Rename(name) => {
                playlist.name = name.clone();
                true
            }
            PlaylistChange::Move { from, to } => playlist.move_item(*from, *to),
        }
    }

    /// The single remote call mirroring the change, built from the updated playlist
    fn request(&self, playlist: &Playlist) -> ApiRequest {
        match self {
            PlaylistChange::AddSong(song_id) => ApiRequest::new(Action::PlaylistAddSong)
                .filter(&playlist.id)
                .param("song", song_id),
            PlaylistChange::RemoveAt(index) => ApiRequest::new(Action::PlaylistRemoveSong)
                .filter(&playlist.id)
                .param("track", index + 1),
            PlaylistChange::Rename(name) => ApiRequest::new(Action::PlaylistEdit)
                .filter(&playlist.id)
                .param("name", name),
            PlaylistChange::Move { .. } => {
                let positions: Vec<String> =
                    (1..=playlist.items.len()).map(|p| p.to_string()).collect();
                ApiRequest::new(Action::PlaylistEdit)
                    .filter(&playlist.id)
                    .param("items", playlist.song_ids().join(","))
                    .param("tracks", positions.join(","))
            }
        }
    }
}

impl Syncer {
    /// Refresh the playlist list and download playlists whose item count changed
    #[instrument(skip(self))]
    pub async fn sync_playlists(&self) -> SyncOutcome {
        let work = async {
            let wave_id = self.current_wave_id().await?;
            self.refresh_playlists(wave_id).await
        };
        self.targeted("playlists", Capability::Library, work).await
    }

    /// Download one playlist's songs, replacing its local items
    #[instrument(skip(self))]
    pub async fn download_playlist(&self, playlist_id: &str) -> SyncOutcome {
        let work = async {
            let mut tally = Tally::new(self.current_wave_id().await?);
            let mut ctx = self.library.context().await?;
            let result = self.download_in(ctx.as_mut(), playlist_id, &mut tally).await;
            let downloaded = settle(ctx, result).await?;
            if downloaded {
                self.playlist_updated(playlist_id, "downloaded");
            }
            Ok(tally)
        };
        self.targeted("playlist_download", Capability::Library, work)
            .await
    }

    /// Apply a local change and upload it
    #[instrument(skip(self))]
    pub async fn update_playlist(&self, playlist_id: &str, change: PlaylistChange) -> SyncOutcome {
        self.targeted(
            "playlist_upload",
            Capability::Library,
            self.upload(playlist_id, &change),
        )
        .await
    }

    /// Create a playlist remotely and store the server's copy
    #[instrument(skip(self))]
    pub async fn create_playlist(&self, name: &str, public: bool) -> SyncOutcome {
        let work = async {
            let request = ApiRequest::new(Action::PlaylistCreate)
                .param("name", name)
                .param("type", if public { "public" } else { "private" });
            let tokens = self.fetcher.fetch(&request).await?;

            let mut tally = Tally::new(self.current_wave_id().await?);
            let mut ctx = self.library.context().await?;
            let decoded = self
                .decoder(PlaylistBuilder, tally.wave_id)
                .decode(&tokens, ctx.as_mut())
                .await;
            let created = settle(ctx, decoded).await?;
            if created.is_empty() {
                return Err(SyncError::InvalidInput(
                    "playlist_create returned no playlist".to_string(),
                ));
            }
            for id in &created.ids {
                self.playlist_updated(id, "created");
            }
            tally.record(created);
            Ok(tally)
        };
        self.targeted("playlist_create", Capability::Library, work)
            .await
    }

    /// Delete a playlist remotely, then mark it deleted locally
    #[instrument(skip(self))]
    pub async fn delete_playlist(&self, playlist_id: &str) -> SyncOutcome {
        let work = async {
            let request = ApiRequest::new(Action::PlaylistDelete).filter(playlist_id);
            self.fetcher.fetch(&request).await?;

            let mut tally = Tally::new(self.current_wave_id().await?);
            let mut ctx = self.library.context().await?;
            let result = cascade_delete(
                ctx.as_mut(),
                EntityKind::Playlist,
                playlist_id,
                &mut tally.deleted,
            )
            .await;
            settle(ctx, result).await?;
            Ok(tally)
        };
        self.targeted("playlist_delete", Capability::Library, work)
            .await
    }

    /// Reconcile the playlist list and download changed playlists
    pub(crate) async fn refresh_playlists(&self, wave_id: Option<WaveId>) -> Result<Tally> {
        let started = Instant::now();
        let mut tally = Tally::new(wave_id);
        let mut ctx = self.library.context().await?;

        let result = async {
            let before = available_ids::<Playlist>(ctx.as_mut()).await?;
            let mut decoder = self.decoder(PlaylistBuilder, wave_id);
            let fetched = self
                .fetch_list(ctx.as_mut(), ApiRequest::new(Action::Playlists), &mut decoder)
                .await?;
            delete_missing(
                ctx.as_mut(),
                EntityKind::Playlist,
                &before,
                &fetched.id_set(),
                &mut tally.deleted,
            )
            .await?;
            Ok::<_, SyncError>(fetched)
        }
        .await;
        let fetched = settle(ctx, result).await?;

        let mut stale = Vec::new();
        {
            let mut ctx = self.library.context().await?;
            for id in &fetched.ids {
                if let Some(playlist) = ctx.get_record::<Playlist>(id).await? {
                    if playlist.remote_item_count as usize != playlist.items.len() {
                        stale.push(id.clone());
                    }
                }
            }
            ctx.rollback().await?;
        }
        tally.record(fetched);

        for id in stale {
            let mut ctx = self.library.context().await?;
            let mut downloads = Tally::new(wave_id);
            let result = self.download_in(ctx.as_mut(), &id, &mut downloads).await;
            if settle(ctx, result).await? {
                self.playlist_updated(&id, "downloaded");
            }
            tally.deleted.merge(downloads.deleted);
        }

        debug!(
            playlists = tally.processed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Playlists refreshed"
        );
        Ok(tally)
    }

    /// Download into `ctx`; `false` when the playlist is gone remotely
    async fn download_in(
        &self,
        ctx: &mut dyn LibraryContext,
        playlist_id: &str,
        tally: &mut Tally,
    ) -> Result<bool> {
        let request = ApiRequest::new(Action::Playlist).filter(playlist_id);
        let own = match self.fetcher.fetch(&request).await {
            Ok(tokens) => {
                self.decoder(PlaylistBuilder, tally.wave_id)
                    .decode(&tokens, ctx)
                    .await?
            }
            Err(e) if e.fault().is_some_and(|f| f.is_not_found()) => DecodeOutcome::default(),
            Err(e) => return Err(e),
        };
        if own.is_empty() {
            cascade_delete(ctx, EntityKind::Playlist, playlist_id, &mut tally.deleted).await?;
            return Ok(false);
        }

        let (mut tracks, songs) = self.download_tracks(ctx, playlist_id, tally).await?;
        // Stable: duplicate positions keep response order
        tracks.sort_by_key(|(position, _)| *position);

        let Some(mut playlist) = ctx.get_record::<Playlist>(playlist_id).await? else {
            return Ok(false);
        };
        playlist.replace_items(tracks.into_iter().map(|(_, song_id)| song_id));
        playlist.remote_item_count = playlist.items.len() as u32;
        ctx.save_record(playlist).await?;

        debug!(playlist_id, songs, "Playlist downloaded");
        tally.record(own);
        tally.processed += songs;
        Ok(true)
    }

    /// Every `(position, song_id)` of a playlist, paging until an empty page
    ///
    /// A playlist may hold the same song more than once, so pages are not
    /// deduplicated by id. A page whose positions were all seen before ends
    /// the listing for servers that ignore `offset`; its tracks are dropped.
    async fn download_tracks(
        &self,
        ctx: &mut dyn LibraryContext,
        playlist_id: &str,
        tally: &Tally,
    ) -> Result<(Vec<(u32, String)>, u64)> {
        let request = ApiRequest::new(Action::PlaylistSongs).filter(playlist_id);
        let mut tracks = Vec::new();
        let mut positions = HashSet::new();
        let mut parsed = 0;
        let mut offset = 0;

        loop {
            let page = request.clone().offset(offset).limit(self.config.page_size);
            let tokens = self.fetcher.fetch(&page).await?;
            let mut decoder =
                self.decoder(PlaylistTrackBuilder::starting_at(offset), tally.wave_id);
            let outcome = decoder.decode(&tokens, ctx).await?;
            if outcome.parsed == 0 {
                break;
            }

            let page_tracks = decoder.into_builder().into_tracks();
            let fresh = page_tracks
                .iter()
                .filter(|(position, _)| positions.insert(*position))
                .count();
            if fresh == 0 {
                break;
            }

            parsed += outcome.parsed;
            tracks.extend(page_tracks);
            offset += self.config.page_size;
        }

        Ok((tracks, parsed))
    }

    async fn upload(&self, playlist_id: &str, change: &PlaylistChange) -> Result<Tally> {
        let mut tally = Tally::new(self.current_wave_id().await?);
        let mut ctx = self.library.context().await?;

        let result = async {
            let mut playlist = ctx
                .get_record::<Playlist>(playlist_id)
                .await?
                .filter(|playlist| playlist.remote_status == RemoteStatus::Available)
                .ok_or_else(|| {
                    SyncError::InvalidInput(format!("Unknown playlist {playlist_id}"))
                })?;
            if !change.apply(&mut playlist) {
                return Err(SyncError::InvalidInput(format!(
                    "{change:?} does not fit playlist {playlist_id}"
                )));
            }
            playlist.remote_item_count = playlist.items.len() as u32;
            let request = change.request(&playlist);
            ctx.save_record(playlist).await?;
            Ok(request)
        }
        .await;
        let request = settle(ctx, result).await?;

        self.fetcher.fetch(&request).await?;
        info!(playlist_id, change = change.change_type(), "Playlist change uploaded");
        self.playlist_updated(playlist_id, change.change_type());

        tally.processed = 1;
        tally.ids.push(playlist_id.to_string());
        Ok(tally)
    }

    fn playlist_updated(&self, playlist_id: &str, change_type: &str) {
        self.observer
            .emit_core(CoreEvent::Library(LibraryEvent::PlaylistUpdated {
                playlist_id: playlist_id.to_string(),
                change_type: change_type.to_string(),
            }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::{LibraryRecord, PlaylistItem};

    fn playlist(songs: &[&str]) -> Playlist {
        let mut playlist = Playlist::with_id("p1");
        playlist.replace_items(songs.iter().copied());
        playlist
    }

    #[test]
    fn test_remove_uses_one_based_track() {
        let mut list = playlist(&["a", "b", "c"]);
        let change = PlaylistChange::RemoveAt(1);
        assert!(change.apply(&mut list));

        let request = change.request(&list);
        assert_eq!(request.action, Action::PlaylistRemoveSong);
        assert_eq!(request.get("filter"), Some("p1"));
        assert_eq!(request.get("track"), Some("2"));
        assert_eq!(list.song_ids(), ["a", "c"]);
        assert!(list.is_dense());
    }

    #[test]
    fn test_move_sends_full_order() {
        let mut list = playlist(&["a", "b", "c"]);
        let change = PlaylistChange::Move { from: 2, to: 0 };
        assert!(change.apply(&mut list));

        let request = change.request(&list);
        assert_eq!(request.action, Action::PlaylistEdit);
        assert_eq!(request.get("items"), Some("c,a,b"));
        assert_eq!(request.get("tracks"), Some("1,2,3"));
    }

    #[test]
    fn test_out_of_range_changes_do_not_apply() {
        let mut list = playlist(&["a"]);
        assert!(!PlaylistChange::RemoveAt(3).apply(&mut list));
        assert!(!PlaylistChange::Move { from: 0, to: 4 }.apply(&mut list));
        assert_eq!(
            list.items,
            vec![PlaylistItem {
                order: 0,
                song_id: "a".to_string()
            }]
        );
    }

    #[test]
    fn test_add_and_rename() {
        let mut list = playlist(&[]);
        let add = PlaylistChange::AddSong("s9".to_string());
        assert!(add.apply(&mut list));
        assert_eq!(add.request(&list).get("song"), Some("s9"));

        let rename = PlaylistChange::Rename("Road".to_string());
        assert!(rename.apply(&mut list));
        assert_eq!(list.name, "Road");
        assert_eq!(rename.request(&list).get("name"), Some("Road"));
    }
}
