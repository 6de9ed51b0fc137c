//! # Entity Decoder
//!
//! One generic token consumer, parameterized per entity kind by an
//! [`EntityBuilder`] strategy.
//!
//! ## Decoding Rules
//!
//! For every root element of the builder's kind the decoder:
//! 1. resolves identity: loads the stored entity with the same remote id or
//!    creates one linked to the active wave;
//! 2. assigns the text of each scalar child tag through the builder;
//! 3. on a reference child tag carrying an `id` attribute, links the entity
//!    if it is already known, otherwise remembers the id and, at the tag's
//!    close, synthesizes a minimal entity named after the tag's text;
//! 4. on close, saves the entity, counts it and records its id in the
//!    per-call parsed set.
//!
//! Re-decoding the same payload against the same wave finds every entity by
//! id and only updates fields; it never creates duplicates.

mod builders;
pub mod fields;

pub use builders::{
    AlbumBuilder, ArtistBuilder, DirectoryBuilder, GenreBuilder, MusicFolderBuilder,
    PlaylistBuilder, PlaylistTrackBuilder, PodcastBuilder, PodcastEpisodeBuilder, SongBuilder,
};

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use core_library::{
    EntityKind, LibraryContext, LibraryContextExt, LibraryEntity, LibraryRecord, RemoteStatus,
    WaveId,
};
use provider_ampache::XmlToken;
use tracing::{debug, trace};

use crate::observer::SyncObserver;
use crate::Result;

/// Per-kind decoding strategy
///
/// Builders are plain values owned by one decode call, so they may keep
/// per-parse state (see [`PlaylistTrackBuilder`]).
pub trait EntityBuilder: Send {
    type Entity: LibraryRecord;

    /// Tag of the element holding one entity
    const ROOT: &'static str;

    /// Kind referenced by a child tag, if the tag is a reference
    fn reference(&self, tag: &str) -> Option<EntityKind> {
        let _ = tag;
        None
    }

    /// Called when the root element opens; dated fields the payload omits
    /// keep the value set here
    fn begin(&mut self, entity: &mut Self::Entity, now: DateTime<Utc>) {
        let _ = (entity, now);
    }

    /// Assign the text of a scalar child tag
    fn assign(&mut self, entity: &mut Self::Entity, tag: &str, text: &str, now: DateTime<Utc>);

    /// Point the entity at a resolved reference
    fn link(&mut self, entity: &mut Self::Entity, tag: &str, id: &str) {
        let _ = (entity, tag, id);
    }

    /// Called once the root element closes, before the entity is saved
    fn finish(&mut self, entity: &Self::Entity) {
        let _ = entity;
    }
}

/// What one decode call produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOutcome {
    /// Root elements decoded; the pagination termination signal
    pub parsed: u64,
    /// Ids in document order
    pub ids: Vec<String>,
}

impl DecodeOutcome {
    fn record(&mut self, id: String) {
        self.parsed += 1;
        self.ids.push(id);
    }

    pub fn is_empty(&self) -> bool {
        self.parsed == 0
    }

    pub fn id_set(&self) -> HashSet<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn merge(&mut self, other: DecodeOutcome) {
        self.parsed += other.parsed;
        self.ids.extend(other.ids);
    }
}

struct OpenReference {
    tag: String,
    kind: EntityKind,
    id: String,
    resolved: bool,
}

pub struct EntityDecoder<B: EntityBuilder> {
    builder: B,
    wave_id: Option<WaveId>,
    now: DateTime<Utc>,
    links: Vec<(String, String)>,
    observer: Option<SyncObserver>,
    processed: u64,
}

impl<B: EntityBuilder> EntityDecoder<B> {
    /// Decoder creating new entities under `wave_id`
    pub fn new(builder: B, wave_id: Option<WaveId>) -> Self {
        Self {
            builder,
            wave_id,
            now: Utc::now(),
            links: Vec::new(),
            observer: None,
            processed: 0,
        }
    }

    /// Link every decoded entity to `id` through reference tag `tag`,
    /// unless the payload itself says otherwise
    pub fn with_link(mut self, tag: impl Into<String>, id: impl Into<String>) -> Self {
        self.links.push((tag.into(), id.into()));
        self
    }

    pub fn with_observer(mut self, observer: SyncObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Fixed decode time used for absent dates
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    pub fn into_builder(self) -> B {
        self.builder
    }

    /// Decode every root element in `tokens` into `ctx`
    ///
    /// Nothing is committed; the caller owns the context.
    pub async fn decode(
        &mut self,
        tokens: &[XmlToken],
        ctx: &mut dyn LibraryContext,
    ) -> Result<DecodeOutcome> {
        let mut outcome = DecodeOutcome::default();
        let mut current: Option<B::Entity> = None;
        let mut skipping = false;
        let mut nested = 0usize;
        let mut open_ref: Option<OpenReference> = None;

        for token in tokens {
            match token {
                XmlToken::Open { name, .. } if name.as_str() == B::ROOT => {
                    if current.is_some() || skipping {
                        nested += 1;
                        continue;
                    }
                    match token.attr("id").map(str::trim).filter(|id| !id.is_empty()) {
                        Some(id) => current = Some(self.resolve_root(ctx, id).await?),
                        None => {
                            debug!(tag = B::ROOT, "Skipping element without id");
                            skipping = true;
                        }
                    }
                }
                XmlToken::Close { name, .. } if name.as_str() == B::ROOT => {
                    if nested > 0 {
                        nested -= 1;
                        continue;
                    }
                    skipping = false;
                    open_ref = None;
                    if let Some(entity) = current.take() {
                        self.finish(ctx, entity, &mut outcome).await?;
                    }
                }
                XmlToken::Open { name, .. } => {
                    let Some(entity) = current.as_mut() else {
                        continue;
                    };
                    if nested > 0 {
                        continue;
                    }
                    let Some(kind) = self.builder.reference(name) else {
                        continue;
                    };
                    let Some(id) = token.attr("id").map(str::trim).filter(|id| !id.is_empty())
                    else {
                        continue;
                    };

                    let resolved = ctx.get(kind, id).await?.is_some();
                    if resolved {
                        self.builder.link(entity, name, id);
                    }
                    open_ref = Some(OpenReference {
                        tag: name.clone(),
                        kind,
                        id: id.to_string(),
                        resolved,
                    });
                }
                XmlToken::Close { name, text } => {
                    let Some(entity) = current.as_mut() else {
                        continue;
                    };
                    if nested > 0 {
                        continue;
                    }
                    match open_ref.take() {
                        Some(reference) if reference.tag == *name => {
                            self.close_reference(ctx, entity, reference, text).await?;
                        }
                        other => {
                            open_ref = other;
                            self.builder.assign(entity, name, text, self.now);
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn resolve_root(&mut self, ctx: &mut dyn LibraryContext, id: &str) -> Result<B::Entity> {
        let mut entity = match ctx.get_record::<B::Entity>(id).await? {
            Some(existing) => existing,
            None => {
                let mut created = B::Entity::with_id(id);
                created.set_wave_id(self.wave_id);
                created
            }
        };
        entity.set_remote_status(RemoteStatus::Available);
        self.builder.begin(&mut entity, self.now);

        for (tag, target) in &self.links {
            self.builder.link(&mut entity, tag, target);
        }
        Ok(entity)
    }

    async fn close_reference(
        &mut self,
        ctx: &mut dyn LibraryContext,
        entity: &mut B::Entity,
        reference: OpenReference,
        text: &str,
    ) -> Result<()> {
        match ctx.get(reference.kind, &reference.id).await? {
            Some(mut existing) => {
                if !reference.resolved {
                    self.builder.link(entity, &reference.tag, &reference.id);
                }
                if existing.display_name().is_empty() && !text.is_empty() {
                    existing.set_display_name(text);
                    ctx.save(existing).await?;
                }
            }
            None => {
                trace!(kind = %reference.kind, id = %reference.id, "Synthesizing referenced entity");
                ctx.save(LibraryEntity::stub(
                    reference.kind,
                    &reference.id,
                    text,
                    self.wave_id,
                ))
                .await?;
                self.builder.link(entity, &reference.tag, &reference.id);
            }
        }
        Ok(())
    }

    async fn finish(
        &mut self,
        ctx: &mut dyn LibraryContext,
        entity: B::Entity,
        outcome: &mut DecodeOutcome,
    ) -> Result<()> {
        self.builder.finish(&entity);
        let id = entity.id().to_string();
        ctx.save_record(entity).await?;
        outcome.record(id);

        self.processed += 1;
        if let Some(observer) = &self.observer {
            observer.entity_decoded(B::Entity::KIND, self.processed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
