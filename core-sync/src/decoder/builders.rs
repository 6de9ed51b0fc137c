//! Per-kind tag mappings

use chrono::{DateTime, Utc};
use core_library::{
    Album, Artist, Directory, EntityKind, Genre, MusicFolder, Playlist, Podcast, PodcastEpisode,
    Song,
};

use super::fields::{date, flag, number, optional, rating};
use super::EntityBuilder;

#[derive(Debug, Default)]
pub struct GenreBuilder;

impl EntityBuilder for GenreBuilder {
    type Entity = Genre;
    const ROOT: &'static str = "genre";

    fn assign(&mut self, genre: &mut Genre, tag: &str, text: &str, _now: DateTime<Utc>) {
        if tag == "name" {
            genre.name = text.to_string();
        }
    }
}

#[derive(Debug, Default)]
pub struct ArtistBuilder;

impl EntityBuilder for ArtistBuilder {
    type Entity = Artist;
    const ROOT: &'static str = "artist";

    fn reference(&self, tag: &str) -> Option<EntityKind> {
        (tag == "genre").then_some(EntityKind::Genre)
    }

    fn assign(&mut self, artist: &mut Artist, tag: &str, text: &str, _now: DateTime<Utc>) {
        match tag {
            "name" => artist.name = text.to_string(),
            "albumcount" => artist.album_count = number(text),
            "songcount" => artist.song_count = number(text),
            "art" => artist.art_url = optional(text),
            "flag" => artist.is_favorite = flag(text),
            "rating" => artist.rating = rating(text),
            _ => {}
        }
    }

    fn link(&mut self, artist: &mut Artist, tag: &str, id: &str) {
        if tag == "genre" {
            artist.genre_id = Some(id.to_string());
        }
    }
}

#[derive(Debug, Default)]
pub struct AlbumBuilder;

impl EntityBuilder for AlbumBuilder {
    type Entity = Album;
    const ROOT: &'static str = "album";

    fn reference(&self, tag: &str) -> Option<EntityKind> {
        match tag {
            "artist" => Some(EntityKind::Artist),
            "genre" => Some(EntityKind::Genre),
            _ => None,
        }
    }

    fn assign(&mut self, album: &mut Album, tag: &str, text: &str, _now: DateTime<Utc>) {
        match tag {
            "name" => album.name = text.to_string(),
            "year" => album.year = number(text),
            "songcount" | "tracks" => album.song_count = number(text),
            "disk" => album.disk = number(text),
            "art" => album.art_url = optional(text),
            "flag" => album.is_favorite = flag(text),
            "rating" => album.rating = rating(text),
            _ => {}
        }
    }

    fn link(&mut self, album: &mut Album, tag: &str, id: &str) {
        match tag {
            "artist" => album.artist_id = Some(id.to_string()),
            "genre" => album.genre_id = Some(id.to_string()),
            _ => {}
        }
    }
}

/// Songs; `albumartist` is ignored in favor of the track artist
#[derive(Debug, Default)]
pub struct SongBuilder;

impl EntityBuilder for SongBuilder {
    type Entity = Song;
    const ROOT: &'static str = "song";

    fn reference(&self, tag: &str) -> Option<EntityKind> {
        match tag {
            "artist" => Some(EntityKind::Artist),
            "album" => Some(EntityKind::Album),
            "genre" => Some(EntityKind::Genre),
            _ => None,
        }
    }

    fn assign(&mut self, song: &mut Song, tag: &str, text: &str, _now: DateTime<Utc>) {
        match tag {
            "title" => song.title = text.to_string(),
            "track" => song.track = number(text),
            "disk" => song.disk = number(text),
            "time" => song.duration = number(text),
            "year" => song.year = number(text),
            "bitrate" => song.bitrate = number(text),
            "size" => song.size = number(text),
            "mime" => song.mime = optional(text),
            "url" => song.url = optional(text),
            "art" => song.art_url = optional(text),
            "flag" => song.is_favorite = flag(text),
            "rating" => song.rating = rating(text),
            _ => {}
        }
    }

    fn link(&mut self, song: &mut Song, tag: &str, id: &str) {
        let id = Some(id.to_string());
        match tag {
            "artist" => song.artist_id = id,
            "album" => song.album_id = id,
            "genre" => song.genre_id = id,
            "directory" => song.directory_id = id,
            _ => {}
        }
    }
}

/// Songs of one playlist, remembering each song's `playlisttrack` position
///
/// Positions are 1-based as sent by the server; songs without a position
/// take the one after the highest seen, counting from the page offset.
#[derive(Debug, Default)]
pub struct PlaylistTrackBuilder {
    songs: SongBuilder,
    pending: Option<u32>,
    base: u32,
    tracks: Vec<(u32, String)>,
}

impl PlaylistTrackBuilder {
    /// Builder for the page that begins at `offset`
    pub fn starting_at(offset: u64) -> Self {
        Self {
            base: u32::try_from(offset).unwrap_or(u32::MAX),
            ..Self::default()
        }
    }

    /// `(position, song_id)` pairs in document order
    pub fn tracks(&self) -> &[(u32, String)] {
        &self.tracks
    }

    pub fn into_tracks(self) -> Vec<(u32, String)> {
        self.tracks
    }
}

impl EntityBuilder for PlaylistTrackBuilder {
    type Entity = Song;
    const ROOT: &'static str = "song";

    fn reference(&self, tag: &str) -> Option<EntityKind> {
        self.songs.reference(tag)
    }

    fn assign(&mut self, song: &mut Song, tag: &str, text: &str, now: DateTime<Utc>) {
        if tag == "playlisttrack" {
            self.pending = text.trim().parse().ok();
        } else {
            self.songs.assign(song, tag, text, now);
        }
    }

    fn link(&mut self, song: &mut Song, tag: &str, id: &str) {
        self.songs.link(song, tag, id);
    }

    fn finish(&mut self, song: &Song) {
        let position = self
            .pending
            .take()
            .unwrap_or_else(|| {
                let highest = self.tracks.iter().map(|(p, _)| *p).max();
                highest.unwrap_or(self.base).saturating_add(1)
            });
        self.tracks.push((position, song.id.clone()));
    }
}

#[derive(Debug, Default)]
pub struct PlaylistBuilder;

impl EntityBuilder for PlaylistBuilder {
    type Entity = Playlist;
    const ROOT: &'static str = "playlist";

    fn assign(&mut self, playlist: &mut Playlist, tag: &str, text: &str, _now: DateTime<Utc>) {
        match tag {
            "name" => playlist.name = text.to_string(),
            "owner" => playlist.owner = optional(text),
            "items" => playlist.remote_item_count = number(text),
            "type" => playlist.is_public = text.eq_ignore_ascii_case("public"),
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
pub struct PodcastBuilder;

impl EntityBuilder for PodcastBuilder {
    type Entity = Podcast;
    const ROOT: &'static str = "podcast";

    fn assign(&mut self, podcast: &mut Podcast, tag: &str, text: &str, _now: DateTime<Utc>) {
        match tag {
            "name" | "title" => podcast.title = text.to_string(),
            "description" => podcast.description = optional(text),
            "feed_url" => podcast.feed_url = optional(text),
            "art" => podcast.art_url = optional(text),
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
pub struct PodcastEpisodeBuilder;

impl EntityBuilder for PodcastEpisodeBuilder {
    type Entity = PodcastEpisode;
    const ROOT: &'static str = "podcast_episode";

    fn reference(&self, tag: &str) -> Option<EntityKind> {
        (tag == "podcast").then_some(EntityKind::Podcast)
    }

    fn begin(&mut self, episode: &mut PodcastEpisode, now: DateTime<Utc>) {
        episode.publish_date = now;
    }

    fn assign(
        &mut self,
        episode: &mut PodcastEpisode,
        tag: &str,
        text: &str,
        now: DateTime<Utc>,
    ) {
        match tag {
            "title" | "name" => episode.title = text.to_string(),
            "description" => episode.description = optional(text),
            "author" => episode.author = optional(text),
            "pubdate" => episode.publish_date = date(text, now),
            "state" => episode.state = optional(text),
            "time" => episode.duration = number(text),
            "size" => episode.size = number(text),
            "url" => episode.url = optional(text),
            _ => {}
        }
    }

    fn link(&mut self, episode: &mut PodcastEpisode, tag: &str, id: &str) {
        if tag == "podcast" {
            episode.podcast_id = Some(id.to_string());
        }
    }
}

/// Catalogs, stored as music folders
#[derive(Debug, Default)]
pub struct MusicFolderBuilder;

impl EntityBuilder for MusicFolderBuilder {
    type Entity = MusicFolder;
    const ROOT: &'static str = "catalog";

    fn assign(&mut self, folder: &mut MusicFolder, tag: &str, text: &str, _now: DateTime<Utc>) {
        if tag == "name" {
            folder.name = text.to_string();
        }
    }
}

#[derive(Debug, Default)]
pub struct DirectoryBuilder;

impl EntityBuilder for DirectoryBuilder {
    type Entity = Directory;
    const ROOT: &'static str = "directory";

    fn reference(&self, tag: &str) -> Option<EntityKind> {
        match tag {
            "catalog" => Some(EntityKind::MusicFolder),
            "parent" => Some(EntityKind::Directory),
            _ => None,
        }
    }

    fn assign(&mut self, directory: &mut Directory, tag: &str, text: &str, _now: DateTime<Utc>) {
        if tag == "name" {
            directory.name = text.to_string();
        }
    }

    fn link(&mut self, directory: &mut Directory, tag: &str, id: &str) {
        match tag {
            "catalog" => directory.music_folder_id = Some(id.to_string()),
            "parent" => directory.parent_id = Some(id.to_string()),
            _ => {}
        }
    }
}
