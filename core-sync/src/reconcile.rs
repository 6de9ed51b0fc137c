//! # Deletion Reconciliation
//!
//! Targeted syncs snapshot the local entities related to what they query,
//! fetch, and subtract the freshly parsed ids from the snapshot. Whatever
//! remains is marked `RemoteStatus::Deleted`, cascading to dependents:
//!
//! ```text
//! artist       → albums → songs
//! album        → songs
//! podcast      → episodes
//! music folder → directories → songs
//! directory    → sub-directories, songs
//! ```
//!
//! Reconciliation is scoped to the queried subset; entities outside it are
//! never touched, so a remote deletion is only noticed once something that
//! relates to the deleted entity is synced again.

use std::collections::{BTreeMap, HashSet};

use core_library::{EntityKind, LibraryContext, LibraryContextExt, LibraryRecord, RemoteStatus};
use core_runtime::events::{CoreEvent, LibraryEvent};
use tracing::debug;

use crate::observer::SyncObserver;
use crate::Result;

/// Entities newly marked deleted, per kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    deleted: BTreeMap<EntityKind, Vec<String>>,
}

impl DeletionReport {
    fn record(&mut self, kind: EntityKind, id: &str) {
        self.deleted.entry(kind).or_default().push(id.to_string());
    }

    pub fn ids(&self, kind: EntityKind) -> &[String] {
        self.deleted.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total(&self) -> u64 {
        self.deleted.values().map(|ids| ids.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn merge(&mut self, other: DeletionReport) {
        for (kind, ids) in other.deleted {
            self.deleted.entry(kind).or_default().extend(ids);
        }
    }

    /// One `EntitiesDeleted` event per kind
    pub fn emit(&self, observer: &SyncObserver) {
        for (kind, ids) in &self.deleted {
            observer.emit_core(CoreEvent::Library(LibraryEvent::EntitiesDeleted {
                kind: kind.to_string(),
                ids: ids.clone(),
            }));
        }
    }
}

/// Kinds that depend on `kind`
fn dependents(kind: EntityKind) -> &'static [EntityKind] {
    match kind {
        EntityKind::Artist => &[EntityKind::Album],
        EntityKind::Album => &[EntityKind::Song],
        EntityKind::Podcast => &[EntityKind::PodcastEpisode],
        EntityKind::MusicFolder => &[EntityKind::Directory],
        EntityKind::Directory => &[EntityKind::Directory, EntityKind::Song],
        _ => &[],
    }
}

/// Mark an entity deleted along with everything depending on it
///
/// Already-deleted entities are not reported again.
pub async fn cascade_delete(
    ctx: &mut dyn LibraryContext,
    kind: EntityKind,
    id: &str,
    report: &mut DeletionReport,
) -> Result<()> {
    let mut pending = vec![(kind, id.to_string())];
    let mut visited = HashSet::new();

    while let Some((kind, id)) = pending.pop() {
        if !visited.insert((kind, id.clone())) {
            continue;
        }
        if ctx.mark_deleted(kind, &id).await? {
            debug!(kind = %kind, id = %id, "Marked deleted");
            report.record(kind, &id);
        }

        for child_kind in dependents(kind) {
            for child in ctx.list(*child_kind).await? {
                let related = child.remote_status() == RemoteStatus::Available
                    && child.reference(kind) == Some(id.as_str());
                if related {
                    pending.push((*child_kind, child.id().to_string()));
                }
            }
        }
    }

    Ok(())
}

/// Ids of available `T` records referencing a parent, taken before a fetch
pub async fn related_ids<T: LibraryRecord>(
    ctx: &mut dyn LibraryContext,
    parent_kind: EntityKind,
    parent_id: &str,
) -> Result<HashSet<String>> {
    Ok(ctx
        .list_related::<T>(parent_kind, parent_id)
        .await?
        .into_iter()
        .map(|record| record.id().to_string())
        .collect())
}

/// Ids of every available `T` record
pub async fn available_ids<T: LibraryRecord>(
    ctx: &mut dyn LibraryContext,
) -> Result<HashSet<String>> {
    Ok(ctx
        .list_records::<T>()
        .await?
        .into_iter()
        .filter(|record| record.is_available())
        .map(|record| record.id().to_string())
        .collect())
}

/// Cascade-delete every id of `before` missing from `parsed`
pub async fn delete_missing(
    ctx: &mut dyn LibraryContext,
    kind: EntityKind,
    before: &HashSet<String>,
    parsed: &HashSet<String>,
    report: &mut DeletionReport,
) -> Result<()> {
    let mut missing: Vec<&String> = before.difference(parsed).collect();
    missing.sort();
    for id in missing {
        cascade_delete(ctx, kind, id, report).await?;
    }
    Ok(())
}

/// Clear a boolean flag on every `T` that has it set but was not parsed
///
/// Returns the number of records changed.
pub async fn clear_flag_missing<T: LibraryRecord>(
    ctx: &mut dyn LibraryContext,
    parsed: &HashSet<String>,
    get: fn(&T) -> bool,
    set: fn(&mut T, bool),
) -> Result<u64> {
    let mut cleared = 0;
    for mut record in ctx.list_records::<T>().await? {
        if get(&record) && !parsed.contains(record.id()) {
            set(&mut record, false);
            ctx.save_record(record).await?;
            cleared += 1;
        }
    }
    Ok(cleared)
}

/// Set a boolean flag on every parsed `T`
pub async fn set_flag<T: LibraryRecord>(
    ctx: &mut dyn LibraryContext,
    parsed: &[String],
    set: fn(&mut T, bool),
) -> Result<()> {
    for id in parsed {
        if let Some(mut record) = ctx.get_record::<T>(id).await? {
            set(&mut record, true);
            ctx.save_record(record).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::{Album, Artist, LibraryStore, MemoryLibraryStore, Song};

    async fn seed(store: &MemoryLibraryStore) {
        let mut ctx = store.context().await.unwrap();
        ctx.save_record(Artist::with_id("ar1")).await.unwrap();
        ctx.save_record(Artist::with_id("ar2")).await.unwrap();
        for (album, artist) in [("A", "ar1"), ("B", "ar1"), ("C", "ar2")] {
            let mut record = Album::with_id(album);
            record.artist_id = Some(artist.to_string());
            ctx.save_record(record).await.unwrap();
        }
        for (song, album) in [("s1", "A"), ("s2", "B"), ("s3", "B"), ("s4", "C")] {
            let mut record = Song::with_id(song);
            record.album_id = Some(album.to_string());
            record.artist_id = Some("ar1".to_string());
            ctx.save_record(record).await.unwrap();
        }
        ctx.commit().await.unwrap();
    }

    async fn status(store: &MemoryLibraryStore, kind: EntityKind, id: &str) -> RemoteStatus {
        store.snapshot(kind, id).await.unwrap().remote_status()
    }

    #[tokio::test]
    async fn test_album_cascade_reaches_songs() {
        let store = MemoryLibraryStore::new();
        seed(&store).await;

        let mut ctx = store.context().await.unwrap();
        let mut report = DeletionReport::default();
        cascade_delete(ctx.as_mut(), EntityKind::Album, "B", &mut report)
            .await
            .unwrap();
        ctx.commit().await.unwrap();

        assert_eq!(report.ids(EntityKind::Album), ["B"]);
        let mut songs = report.ids(EntityKind::Song).to_vec();
        songs.sort();
        assert_eq!(songs, ["s2", "s3"]);
        assert_eq!(status(&store, EntityKind::Song, "s1").await, RemoteStatus::Available);
    }

    #[tokio::test]
    async fn test_missing_ids_are_deleted_once() {
        let store = MemoryLibraryStore::new();
        seed(&store).await;

        let mut ctx = store.context().await.unwrap();
        let before = related_ids::<Album>(ctx.as_mut(), EntityKind::Artist, "ar1")
            .await
            .unwrap();
        assert_eq!(before.len(), 2);

        let parsed: HashSet<String> = ["A".to_string()].into();
        let mut report = DeletionReport::default();
        delete_missing(ctx.as_mut(), EntityKind::Album, &before, &parsed, &mut report)
            .await
            .unwrap();
        // Second pass finds nothing new
        let mut again = DeletionReport::default();
        delete_missing(ctx.as_mut(), EntityKind::Album, &before, &parsed, &mut again)
            .await
            .unwrap();
        ctx.commit().await.unwrap();

        assert_eq!(report.total(), 3);
        assert!(again.is_empty());
        assert_eq!(status(&store, EntityKind::Album, "A").await, RemoteStatus::Available);
        assert_eq!(status(&store, EntityKind::Album, "C").await, RemoteStatus::Available);
        assert_eq!(status(&store, EntityKind::Song, "s4").await, RemoteStatus::Available);
    }

    #[tokio::test]
    async fn test_clear_flag_missing() {
        let store = MemoryLibraryStore::new();
        let mut ctx = store.context().await.unwrap();
        for id in ["1", "2"] {
            let mut song = Song::with_id(id);
            song.is_favorite = true;
            ctx.save_record(song).await.unwrap();
        }

        let parsed: HashSet<String> = ["1".to_string()].into();
        let cleared = clear_flag_missing::<Song>(
            ctx.as_mut(),
            &parsed,
            |s| s.is_favorite,
            |s, v| s.is_favorite = v,
        )
        .await
        .unwrap();
        ctx.commit().await.unwrap();

        assert_eq!(cleared, 1);
        let songs = store.records::<Song>().await;
        assert!(songs.iter().find(|s| s.id == "1").unwrap().is_favorite);
        assert!(!songs.iter().find(|s| s.id == "2").unwrap().is_favorite);
    }

    #[tokio::test]
    async fn test_report_emits_per_kind() {
        let bus = core_runtime::events::EventBus::new(8);
        let mut events = bus.subscribe();
        let mut report = DeletionReport::default();
        report.record(EntityKind::Album, "B");
        report.record(EntityKind::Song, "s2");

        report.emit(&SyncObserver::new(bus));
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Library(LibraryEvent::EntitiesDeleted { kind, .. }) if kind == "album"
        ));
    }
}
