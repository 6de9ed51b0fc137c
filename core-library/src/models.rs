//! Domain models for the synchronized library
//!
//! Every entity is keyed by the identifier the server assigned to it. Besides
//! its own fields each record carries the sync wave that first created it and
//! a [`RemoteStatus`] that reconciliation flips to `Deleted` when the server no
//! longer reports the entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LibraryError;

// =============================================================================
// ID Types
// =============================================================================

/// Identifier of a persisted sync wave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaveId(pub i64);

impl fmt::Display for WaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Shared Enums
// =============================================================================

/// Whether the server still reports an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    #[default]
    Available,
    Deleted,
}

impl RemoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Available => "available",
            RemoteStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for RemoteStatus {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(RemoteStatus::Available),
            "deleted" => Ok(RemoteStatus::Deleted),
            _ => Err(LibraryError::InvalidInput {
                field: "remote_status".to_string(),
                message: format!("unknown status '{}'", s),
            }),
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of entity the library holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Artist,
    Album,
    Song,
    Genre,
    Playlist,
    Podcast,
    PodcastEpisode,
    MusicFolder,
    Directory,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Artist,
        EntityKind::Album,
        EntityKind::Song,
        EntityKind::Genre,
        EntityKind::Playlist,
        EntityKind::Podcast,
        EntityKind::PodcastEpisode,
        EntityKind::MusicFolder,
        EntityKind::Directory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artist",
            EntityKind::Album => "album",
            EntityKind::Song => "song",
            EntityKind::Genre => "genre",
            EntityKind::Playlist => "playlist",
            EntityKind::Podcast => "podcast",
            EntityKind::PodcastEpisode => "podcast_episode",
            EntityKind::MusicFolder => "music_folder",
            EntityKind::Directory => "directory",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Domain Models
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub wave_id: Option<WaveId>,
    pub remote_status: RemoteStatus,
    pub name: String,
    pub album_count: u32,
    pub song_count: u32,
    pub genre_id: Option<String>,
    pub art_url: Option<String>,
    pub is_favorite: bool,
    /// User rating 0-5
    pub rating: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub wave_id: Option<WaveId>,
    pub remote_status: RemoteStatus,
    pub name: String,
    pub artist_id: Option<String>,
    pub genre_id: Option<String>,
    pub year: u32,
    pub song_count: u32,
    /// Number of discs
    pub disk: u32,
    pub art_url: Option<String>,
    pub is_favorite: bool,
    pub rating: u8,
}

/// A song with the references the server reported for it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub wave_id: Option<WaveId>,
    pub remote_status: RemoteStatus,
    pub title: String,
    pub artist_id: Option<String>,
    pub album_id: Option<String>,
    pub genre_id: Option<String>,
    pub directory_id: Option<String>,
    pub track: u32,
    pub disk: u32,
    /// Duration in seconds
    pub duration: u32,
    pub year: u32,
    /// Bitrate in bits per second as reported by the server
    pub bitrate: u32,
    /// File size in bytes
    pub size: u64,
    pub mime: Option<String>,
    pub url: Option<String>,
    pub art_url: Option<String>,
    pub is_favorite: bool,
    pub rating: u8,
    /// Part of the server's most recent additions
    pub is_recently_added: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: String,
    pub wave_id: Option<WaveId>,
    pub remote_status: RemoteStatus,
    pub name: String,
}

/// One entry of a playlist; `order` is dense and 0-based
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub order: u32,
    pub song_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub wave_id: Option<WaveId>,
    pub remote_status: RemoteStatus,
    pub name: String,
    pub owner: Option<String>,
    pub is_public: bool,
    /// Item count reported by the server; may differ from `items.len()` until
    /// the playlist's songs are downloaded
    pub remote_item_count: u32,
    pub items: Vec<PlaylistItem>,
}

impl Playlist {
    /// Song ids in playlist order
    pub fn song_ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.song_id.as_str()).collect()
    }

    /// Replace all items, numbering them 0..n-1 in the given order
    pub fn replace_items<I, S>(&mut self, song_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items = song_ids
            .into_iter()
            .enumerate()
            .map(|(order, song_id)| PlaylistItem {
                order: order as u32,
                song_id: song_id.into(),
            })
            .collect();
    }

    /// Append songs after the last item
    pub fn add_songs<I, S>(&mut self, song_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for song_id in song_ids {
            let order = self.items.len() as u32;
            self.items.push(PlaylistItem {
                order,
                song_id: song_id.into(),
            });
        }
    }

    /// Remove the item at a 0-based position, keeping the order dense
    pub fn remove_at(&mut self, index: usize) -> Option<PlaylistItem> {
        if index >= self.items.len() {
            return None;
        }
        let removed = self.items.remove(index);
        self.renumber();
        Some(removed)
    }

    /// Move an item between 0-based positions
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        if from >= self.items.len() || to >= self.items.len() {
            return false;
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
        self.renumber();
        true
    }

    fn renumber(&mut self) {
        for (index, item) in self.items.iter_mut().enumerate() {
            item.order = index as u32;
        }
    }

    /// Sort by `order` and renumber 0..n-1
    pub fn normalize(&mut self) {
        self.items.sort_by_key(|item| item.order);
        self.renumber();
    }

    /// Whether the order fields are exactly 0..n-1 in sequence
    pub fn is_dense(&self) -> bool {
        self.items
            .iter()
            .enumerate()
            .all(|(index, item)| item.order == index as u32)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Podcast {
    pub id: String,
    pub wave_id: Option<WaveId>,
    pub remote_status: RemoteStatus,
    pub title: String,
    pub description: Option<String>,
    pub feed_url: Option<String>,
    pub art_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodcastEpisode {
    pub id: String,
    pub wave_id: Option<WaveId>,
    pub remote_status: RemoteStatus,
    pub podcast_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub publish_date: DateTime<Utc>,
    /// Server-side download state (e.g. "completed", "pending")
    pub state: Option<String>,
    pub duration: u32,
    pub size: u64,
    pub url: Option<String>,
}

/// A server catalog exposed as a browsable root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicFolder {
    pub id: String,
    pub wave_id: Option<WaveId>,
    pub remote_status: RemoteStatus,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub id: String,
    pub wave_id: Option<WaveId>,
    pub remote_status: RemoteStatus,
    pub name: String,
    pub music_folder_id: Option<String>,
    pub parent_id: Option<String>,
}

// =============================================================================
// Record Abstraction
// =============================================================================

/// Behaviour shared by every stored entity type
pub trait LibraryRecord: Clone + Send + Sync + fmt::Debug + 'static {
    const KIND: EntityKind;

    /// An empty record carrying only its identifier
    fn with_id(id: &str) -> Self;

    fn id(&self) -> &str;
    fn wave_id(&self) -> Option<WaveId>;
    fn set_wave_id(&mut self, wave_id: Option<WaveId>);
    fn remote_status(&self) -> RemoteStatus;
    fn set_remote_status(&mut self, status: RemoteStatus);

    /// Name shown for the record (title for songs, podcasts and episodes)
    fn display_name(&self) -> &str;
    fn set_display_name(&mut self, name: &str);

    /// Id of the referenced entity of the given kind, if this record points at one
    fn reference(&self, kind: EntityKind) -> Option<&str>;

    fn into_entity(self) -> LibraryEntity;
    fn from_entity(entity: LibraryEntity) -> Option<Self>;

    /// A record synthesized from a reference: id plus name only
    fn stub(id: &str, name: &str, wave_id: Option<WaveId>) -> Self {
        let mut record = Self::with_id(id);
        record.set_display_name(name);
        record.set_wave_id(wave_id);
        record
    }

    fn is_available(&self) -> bool {
        self.remote_status() == RemoteStatus::Available
    }
}

macro_rules! library_record {
    ($ty:ident, $kind:ident, $name:ident, { $($ref_kind:ident => $ref_field:ident),* $(,)? }) => {
        impl LibraryRecord for $ty {
            const KIND: EntityKind = EntityKind::$kind;

            fn with_id(id: &str) -> Self {
                Self {
                    id: id.to_string(),
                    ..Default::default()
                }
            }

            fn id(&self) -> &str {
                &self.id
            }

            fn wave_id(&self) -> Option<WaveId> {
                self.wave_id
            }

            fn set_wave_id(&mut self, wave_id: Option<WaveId>) {
                self.wave_id = wave_id;
            }

            fn remote_status(&self) -> RemoteStatus {
                self.remote_status
            }

            fn set_remote_status(&mut self, status: RemoteStatus) {
                self.remote_status = status;
            }

            fn display_name(&self) -> &str {
                &self.$name
            }

            fn set_display_name(&mut self, name: &str) {
                self.$name = name.to_string();
            }

            #[allow(unreachable_patterns)]
            fn reference(&self, kind: EntityKind) -> Option<&str> {
                match kind {
                    $(EntityKind::$ref_kind => self.$ref_field.as_deref(),)*
                    _ => None,
                }
            }

            fn into_entity(self) -> LibraryEntity {
                LibraryEntity::$kind(self)
            }

            fn from_entity(entity: LibraryEntity) -> Option<Self> {
                match entity {
                    LibraryEntity::$kind(record) => Some(record),
                    _ => None,
                }
            }
        }
    };
}

library_record!(Artist, Artist, name, { Genre => genre_id });
library_record!(Album, Album, name, { Artist => artist_id, Genre => genre_id });
library_record!(Song, Song, title, {
    Artist => artist_id,
    Album => album_id,
    Genre => genre_id,
    Directory => directory_id,
});
library_record!(Genre, Genre, name, {});
library_record!(Playlist, Playlist, name, {});
library_record!(Podcast, Podcast, title, {});
library_record!(PodcastEpisode, PodcastEpisode, title, { Podcast => podcast_id });
library_record!(MusicFolder, MusicFolder, name, {});
library_record!(Directory, Directory, name, {
    MusicFolder => music_folder_id,
    Directory => parent_id,
});

/// Any stored entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LibraryEntity {
    Artist(Artist),
    Album(Album),
    Song(Song),
    Genre(Genre),
    Playlist(Playlist),
    Podcast(Podcast),
    PodcastEpisode(PodcastEpisode),
    MusicFolder(MusicFolder),
    Directory(Directory),
}

macro_rules! dispatch {
    ($entity:expr, $record:ident => $body:expr) => {
        match $entity {
            LibraryEntity::Artist($record) => $body,
            LibraryEntity::Album($record) => $body,
            LibraryEntity::Song($record) => $body,
            LibraryEntity::Genre($record) => $body,
            LibraryEntity::Playlist($record) => $body,
            LibraryEntity::Podcast($record) => $body,
            LibraryEntity::PodcastEpisode($record) => $body,
            LibraryEntity::MusicFolder($record) => $body,
            LibraryEntity::Directory($record) => $body,
        }
    };
}

impl LibraryEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            LibraryEntity::Artist(_) => EntityKind::Artist,
            LibraryEntity::Album(_) => EntityKind::Album,
            LibraryEntity::Song(_) => EntityKind::Song,
            LibraryEntity::Genre(_) => EntityKind::Genre,
            LibraryEntity::Playlist(_) => EntityKind::Playlist,
            LibraryEntity::Podcast(_) => EntityKind::Podcast,
            LibraryEntity::PodcastEpisode(_) => EntityKind::PodcastEpisode,
            LibraryEntity::MusicFolder(_) => EntityKind::MusicFolder,
            LibraryEntity::Directory(_) => EntityKind::Directory,
        }
    }

    pub fn id(&self) -> &str {
        dispatch!(self, record => record.id())
    }

    pub fn wave_id(&self) -> Option<WaveId> {
        dispatch!(self, record => record.wave_id())
    }

    pub fn remote_status(&self) -> RemoteStatus {
        dispatch!(self, record => record.remote_status())
    }

    pub fn set_remote_status(&mut self, status: RemoteStatus) {
        dispatch!(self, record => record.set_remote_status(status))
    }

    pub fn display_name(&self) -> &str {
        dispatch!(self, record => record.display_name())
    }

    pub fn reference(&self, kind: EntityKind) -> Option<&str> {
        dispatch!(self, record => record.reference(kind))
    }

    pub fn set_display_name(&mut self, name: &str) {
        dispatch!(self, record => record.set_display_name(name))
    }

    /// Minimal entity of any kind, synthesized from a reference
    pub fn stub(kind: EntityKind, id: &str, name: &str, wave_id: Option<WaveId>) -> Self {
        match kind {
            EntityKind::Artist => Artist::stub(id, name, wave_id).into_entity(),
            EntityKind::Album => Album::stub(id, name, wave_id).into_entity(),
            EntityKind::Song => Song::stub(id, name, wave_id).into_entity(),
            EntityKind::Genre => Genre::stub(id, name, wave_id).into_entity(),
            EntityKind::Playlist => Playlist::stub(id, name, wave_id).into_entity(),
            EntityKind::Podcast => Podcast::stub(id, name, wave_id).into_entity(),
            EntityKind::PodcastEpisode => PodcastEpisode::stub(id, name, wave_id).into_entity(),
            EntityKind::MusicFolder => MusicFolder::stub(id, name, wave_id).into_entity(),
            EntityKind::Directory => Directory::stub(id, name, wave_id).into_entity(),
        }
    }
}
