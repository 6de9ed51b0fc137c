//! # Library Module
//!
//! Domain model of the synchronized library and the storage seam the sync
//! engine writes through.
//!
//! ## Overview
//!
//! - [`models`]: artists, albums, songs, genres, playlists, podcasts, episodes,
//!   music folders and directories, each keyed by its remote id
//! - [`store`]: the `LibraryStore` / `LibraryContext` collaborator interface and
//!   an in-memory reference implementation
//! - [`db`]: SQLite pool and migrations for the engine's own state

pub mod db;
pub mod error;
pub mod models;
pub mod store;

pub use error::{LibraryError, Result};
pub use models::{
    Album, Artist, Directory, EntityKind, Genre, LibraryEntity, LibraryRecord, MusicFolder,
    Playlist, PlaylistItem, Podcast, PodcastEpisode, RemoteStatus, Song, WaveId,
};
pub use store::{LibraryContext, LibraryContextExt, LibraryStore, MemoryLibraryStore};
