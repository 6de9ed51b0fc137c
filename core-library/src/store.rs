//! # Library Storage Collaborator
//!
//! The synchronization engine never talks to a concrete database for library
//! entities. It asks a [`LibraryStore`] for an isolated [`LibraryContext`],
//! reads and writes entities through it and commits when a unit of work (one
//! page of results, one targeted refresh) is complete. Dropping a context
//! without committing discards its changes.
//!
//! ## Usage
//!
//! ```ignore
//! use core_library::store::{LibraryContextExt, LibraryStore, MemoryLibraryStore};
//! use core_library::models::Artist;
//!
//! let store = MemoryLibraryStore::new();
//! let mut ctx = store.context().await?;
//! ctx.create_record(Artist::stub("1", "Alice Coltrane", None)).await?;
//! ctx.commit().await?;
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{LibraryError, Result};
use crate::models::{EntityKind, LibraryEntity, LibraryRecord, RemoteStatus};

type EntityKey = (EntityKind, String);

/// Factory for isolated units of work
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Open a new context. Changes made through it are invisible to other
    /// contexts until committed.
    async fn context(&self) -> Result<Box<dyn LibraryContext>>;
}

/// One unit of work against the library
#[async_trait]
pub trait LibraryContext: Send {
    /// Fetch an entity by kind and remote id
    async fn get(&mut self, kind: EntityKind, id: &str) -> Result<Option<LibraryEntity>>;

    /// Insert a new entity
    ///
    /// # Errors
    ///
    /// Returns `LibraryError::AlreadyExists` if an entity with the same kind
    /// and id is visible to this context.
    async fn create(&mut self, entity: LibraryEntity) -> Result<()>;

    /// Insert or replace an entity
    async fn save(&mut self, entity: LibraryEntity) -> Result<()>;

    /// Remove an entity; returns whether it existed
    async fn delete(&mut self, kind: EntityKind, id: &str) -> Result<bool>;

    /// All entities of a kind, ordered by id
    async fn list(&mut self, kind: EntityKind) -> Result<Vec<LibraryEntity>>;

    /// Make this context's changes visible to later contexts
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard this context's changes
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Typed helpers over [`LibraryContext`]
#[async_trait]
pub trait LibraryContextExt: LibraryContext {
    async fn get_record<T: LibraryRecord>(&mut self, id: &str) -> Result<Option<T>> {
        Ok(self.get(T::KIND, id).await?.and_then(T::from_entity))
    }

    async fn create_record<T: LibraryRecord>(&mut self, record: T) -> Result<()> {
        self.create(record.into_entity()).await
    }

    async fn save_record<T: LibraryRecord>(&mut self, record: T) -> Result<()> {
        self.save(record.into_entity()).await
    }

    async fn list_records<T: LibraryRecord>(&mut self) -> Result<Vec<T>> {
        Ok(self
            .list(T::KIND)
            .await?
            .into_iter()
            .filter_map(T::from_entity)
            .collect())
    }

    /// Available records of type `T` that reference the given entity
    async fn list_related<T: LibraryRecord>(
        &mut self,
        parent_kind: EntityKind,
        parent_id: &str,
    ) -> Result<Vec<T>> {
        Ok(self
            .list_records::<T>()
            .await?
            .into_iter()
            .filter(|record| {
                record.is_available() && record.reference(parent_kind) == Some(parent_id)
            })
            .collect())
    }

    /// Mark a record deleted remotely; returns false if it was absent or
    /// already deleted
    async fn mark_deleted(&mut self, kind: EntityKind, id: &str) -> Result<bool> {
        match self.get(kind, id).await? {
            Some(mut entity) if entity.remote_status() == RemoteStatus::Available => {
                entity.set_remote_status(RemoteStatus::Deleted);
                self.save(entity).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl<C: LibraryContext + ?Sized> LibraryContextExt for C {}

// ============================================================================
// In-memory Implementation
// ============================================================================

/// Reference [`LibraryStore`] keeping every entity in memory
///
/// Contexts buffer their writes and apply them under a single write lock on
/// commit, so a page committed by one batch task becomes visible atomically.
#[derive(Clone, Default)]
pub struct MemoryLibraryStore {
    tables: Arc<RwLock<BTreeMap<EntityKey, LibraryEntity>>>,
}

impl MemoryLibraryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed entity, bypassing any context
    pub async fn snapshot(&self, kind: EntityKind, id: &str) -> Option<LibraryEntity> {
        self.tables
            .read()
            .await
            .get(&(kind, id.to_string()))
            .cloned()
    }

    /// Committed records of one type
    pub async fn records<T: LibraryRecord>(&self) -> Vec<T> {
        self.tables
            .read()
            .await
            .iter()
            .filter(|((kind, _), _)| *kind == T::KIND)
            .filter_map(|(_, entity)| T::from_entity(entity.clone()))
            .collect()
    }

    /// Number of committed entities of a kind
    pub async fn count(&self, kind: EntityKind) -> usize {
        self.tables
            .read()
            .await
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

#[async_trait]
impl LibraryStore for MemoryLibraryStore {
    async fn context(&self) -> Result<Box<dyn LibraryContext>> {
        Ok(Box::new(MemoryLibraryContext {
            tables: Arc::clone(&self.tables),
            pending: BTreeMap::new(),
        }))
    }
}

struct MemoryLibraryContext {
    tables: Arc<RwLock<BTreeMap<EntityKey, LibraryEntity>>>,
    /// `None` marks a pending delete
    pending: BTreeMap<EntityKey, Option<LibraryEntity>>,
}

impl MemoryLibraryContext {
    async fn visible(&self, key: &EntityKey) -> Option<LibraryEntity> {
        match self.pending.get(key) {
            Some(change) => change.clone(),
            None => self.tables.read().await.get(key).cloned(),
        }
    }
}

#[async_trait]
impl LibraryContext for MemoryLibraryContext {
    async fn get(&mut self, kind: EntityKind, id: &str) -> Result<Option<LibraryEntity>> {
        Ok(self.visible(&(kind, id.to_string())).await)
    }

    async fn create(&mut self, entity: LibraryEntity) -> Result<()> {
        let key = (entity.kind(), entity.id().to_string());
        if self.visible(&key).await.is_some() {
            return Err(LibraryError::AlreadyExists {
                entity_type: key.0.to_string(),
                id: key.1,
            });
        }
        self.pending.insert(key, Some(entity));
        Ok(())
    }

    async fn save(&mut self, entity: LibraryEntity) -> Result<()> {
        let key = (entity.kind(), entity.id().to_string());
        self.pending.insert(key, Some(entity));
        Ok(())
    }

    async fn delete(&mut self, kind: EntityKind, id: &str) -> Result<bool> {
        let key = (kind, id.to_string());
        let existed = self.visible(&key).await.is_some();
        if existed {
            self.pending.insert(key, None);
        }
        Ok(existed)
    }

    async fn list(&mut self, kind: EntityKind) -> Result<Vec<LibraryEntity>> {
        let mut merged: BTreeMap<String, LibraryEntity> = self
            .tables
            .read()
            .await
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, id), entity)| (id.clone(), entity.clone()))
            .collect();

        for ((k, id), change) in &self.pending {
            if *k != kind {
                continue;
            }
            match change {
                Some(entity) => {
                    merged.insert(id.clone(), entity.clone());
                }
                None => {
                    merged.remove(id);
                }
            }
        }

        Ok(merged.into_values().collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryLibraryContext { tables, pending } = *self;
        let changes = pending.len();
        let mut tables = tables.write().await;
        for (key, change) in pending {
            match change {
                Some(entity) => {
                    tables.insert(key, entity);
                }
                None => {
                    tables.remove(&key);
                }
            }
        }
        debug!(changes, "Library context committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!(changes = self.pending.len(), "Library context rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Album, Artist, Song};

    #[tokio::test]
    async fn test_uncommitted_changes_are_isolated() {
        let store = MemoryLibraryStore::new();

        let mut ctx = store.context().await.unwrap();
        ctx.create_record(Artist::stub("1", "Sun Ra", None))
            .await
            .unwrap();

        // Visible inside the context, invisible outside
        assert!(ctx.get_record::<Artist>("1").await.unwrap().is_some());
        let mut other = store.context().await.unwrap();
        assert!(other.get_record::<Artist>("1").await.unwrap().is_none());

        ctx.commit().await.unwrap();
        assert!(other.get_record::<Artist>("1").await.unwrap().is_some());
        assert_eq!(store.count(EntityKind::Artist).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let store = MemoryLibraryStore::new();

        let mut ctx = store.context().await.unwrap();
        ctx.save_record(Album::stub("9", "Lanquidity", None))
            .await
            .unwrap();
        ctx.rollback().await.unwrap();

        assert!(store.snapshot(EntityKind::Album, "9").await.is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = MemoryLibraryStore::new();
        let mut ctx = store.context().await.unwrap();

        ctx.create_record(Artist::stub("1", "A", None)).await.unwrap();
        let result = ctx.create_record(Artist::stub("1", "B", None)).await;
        assert!(matches!(result, Err(LibraryError::AlreadyExists { .. })));

        // Same id under another kind is a different entity
        ctx.create_record(Album::stub("1", "B", None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_merges_pending_changes() {
        let store = MemoryLibraryStore::new();

        let mut seed = store.context().await.unwrap();
        for id in ["1", "2", "3"] {
            seed.save_record(Artist::stub(id, id, None)).await.unwrap();
        }
        seed.commit().await.unwrap();

        let mut ctx = store.context().await.unwrap();
        assert!(ctx.delete(EntityKind::Artist, "2").await.unwrap());
        assert!(!ctx.delete(EntityKind::Artist, "missing").await.unwrap());
        ctx.save_record(Artist::stub("4", "4", None)).await.unwrap();

        let ids: Vec<String> = ctx
            .list_records::<Artist>()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec!["1", "3", "4"]);
    }

    #[tokio::test]
    async fn test_list_related_and_mark_deleted() {
        let store = MemoryLibraryStore::new();
        let mut ctx = store.context().await.unwrap();

        for (id, album) in [("s1", "a1"), ("s2", "a1"), ("s3", "a2")] {
            let mut song = Song::stub(id, id, None);
            song.album_id = Some(album.to_string());
            ctx.save_record(song).await.unwrap();
        }

        let related = ctx
            .list_related::<Song>(EntityKind::Album, "a1")
            .await
            .unwrap();
        assert_eq!(related.len(), 2);

        assert!(ctx.mark_deleted(EntityKind::Song, "s1").await.unwrap());
        // Second mark is a no-op
        assert!(!ctx.mark_deleted(EntityKind::Song, "s1").await.unwrap());

        let related = ctx
            .list_related::<Song>(EntityKind::Album, "a1")
            .await
            .unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, "s2");
    }
}
