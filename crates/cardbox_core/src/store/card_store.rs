//! In-memory card store over a `CardBackend`.
//!
//! # Responsibility
//! - Cache card metadata for the whole vault and hydrate content lazily.
//! - Apply CRUD and reference edits optimistically, then commit to the backend.
//! - Own the autosave scheduler and the current selection.
//! - Merge out-of-band backend changes through the staleness guard.
//!
//! # Invariants
//! - Cached `links` always match the extractor output for cached content,
//!   except for explicit `add_reference` / `remove_reference` edits.
//! - Backend failures never roll back the cache; the divergence is logged.
//! - Commit echoes never overwrite local title/content; they only advance
//!   `updated_at` when the backend clock is ahead.
//! - A card with a pending autosave, or with a local `updated_at` newer than
//!   the backend record, keeps its local fields on external merges.

use crate::backend::{BackendError, CardBackend, CardPatch, CardRecord};
use crate::clock::SharedClock;
use crate::config::StoreConfig;
use crate::links::extractor::{extract_links, TitleIndex};
use crate::model::card::{
    dedupe_links, normalize_tags, validate_card_id, validate_title, Card, CardId, CardSummary,
    CardType, CardValidationError,
};
use crate::model::document::{extract_plain_text, Document};
use crate::store::autosave::{
    AutosaveScheduler, AutosaveState, CommitDecision, CommitPlan, DraftEdit, Snapshot,
};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Store-level error for card operations.
#[derive(Debug)]
pub enum StoreError {
    /// Card is not known to the store.
    CardNotFound(CardId),
    /// Input rejected before any backend call.
    Validation(CardValidationError),
    /// Backend call failed; the cache may be ahead of the backend.
    Backend(BackendError),
    /// Document could not be serialized for commit.
    Content(serde_json::Error),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CardNotFound(id) => write!(f, "card not found: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Backend(err) => write!(f, "{err}"),
            Self::Content(err) => write!(f, "content serialization failed: {err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CardNotFound(_) => None,
            Self::Validation(err) => Some(err),
            Self::Backend(err) => Some(err),
            Self::Content(err) => Some(err),
        }
    }
}

impl From<CardValidationError> for StoreError {
    fn from(value: CardValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<BackendError> for StoreError {
    fn from(value: BackendError) -> Self {
        Self::Backend(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Content(value)
    }
}

/// Partial card update. `None` leaves a field untouched.
///
/// When `content` is present, links are re-extracted from it and any explicit
/// `links` value is ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardUpdate {
    pub title: Option<String>,
    pub content: Option<Document>,
    pub tags: Option<Vec<String>>,
    pub card_type: Option<CardType>,
    pub links: Option<Vec<CardId>>,
}

impl CardUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.tags.is_none()
            && self.card_type.is_none()
            && self.links.is_none()
    }
}

/// Result of one autosave commit attempt.
#[derive(Debug)]
pub enum AutosaveOutcome {
    /// Draft matched the committed snapshot; no backend call.
    Unchanged(CardId),
    /// Changed fields were committed.
    Committed(CardId),
    /// Commit failed; the draft stays local and is retried with the next edit.
    Failed { card_id: CardId, error: StoreError },
}

impl AutosaveOutcome {
    pub fn card_id(&self) -> &str {
        match self {
            Self::Unchanged(id) | Self::Committed(id) => id,
            Self::Failed { card_id, .. } => card_id,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// How an external record was merged into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Card was not cached before.
    Inserted,
    /// Cached fields were replaced by the record.
    Replaced,
    /// Staleness guard kept local fields; only `created_at`/`source_id` moved.
    KeptLocal,
}

/// Result of re-fetching one externally changed card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Merged(MergeOutcome),
    /// Backend no longer has the card; it was evicted.
    Missing,
}

#[derive(Debug, Clone)]
struct CachedCard {
    meta: CardSummary,
    /// `None` until hydrated.
    content: Option<Document>,
}

impl CachedCard {
    fn from_card(card: Card) -> Self {
        let meta = card.summary();
        Self {
            meta,
            content: Some(card.content),
        }
    }

    fn to_card(&self) -> Option<Card> {
        let content = self.content.clone()?;
        Some(Card {
            id: self.meta.id.clone(),
            card_type: self.meta.card_type,
            title: self.meta.title.clone(),
            content,
            tags: self.meta.tags.clone(),
            links: self.meta.links.clone(),
            source_id: self.meta.source_id.clone(),
            created_at: self.meta.created_at,
            updated_at: self.meta.updated_at,
        })
    }
}

/// Card cache and use-case facade over one backend.
pub struct CardStore<B: CardBackend> {
    backend: B,
    clock: SharedClock,
    config: StoreConfig,
    cards: HashMap<CardId, CachedCard>,
    selected: Option<CardId>,
    autosave: AutosaveScheduler,
}

impl<B: CardBackend> CardStore<B> {
    /// Creates an empty store. Call [`CardStore::load`] to fill the index.
    pub fn new(backend: B, clock: SharedClock, config: StoreConfig) -> Self {
        let autosave = AutosaveScheduler::new(config.autosave_debounce_ms);
        Self {
            backend,
            clock,
            config,
            cards: HashMap::new(),
            selected: None,
            autosave,
        }
    }

    /// Replaces the cache with backend metadata.
    ///
    /// Drafts and selection are reset; flush autosave first when switching
    /// vaults.
    pub fn load(&mut self) -> StoreResult<usize> {
        info!("event=store_load module=store status=start");
        let metas = match self.backend.list_cards() {
            Ok(metas) => metas,
            Err(err) => {
                warn!("event=store_load module=store status=error error={err}");
                return Err(err.into());
            }
        };

        self.cards.clear();
        self.autosave.clear();
        self.selected = None;
        for meta in metas {
            let summary = meta.into_summary();
            self.cards.insert(
                summary.id.clone(),
                CachedCard {
                    meta: summary,
                    content: None,
                },
            );
        }

        info!(
            "event=store_load module=store status=ok count={}",
            self.cards.len()
        );
        Ok(self.cards.len())
    }

    /// All cached cards, most recently updated first.
    pub fn list(&self) -> Vec<CardSummary> {
        self.filtered(|_| true)
    }

    /// Cached cards matching `predicate`, most recently updated first.
    pub fn filtered<F>(&self, predicate: F) -> Vec<CardSummary>
    where
        F: Fn(&CardSummary) -> bool,
    {
        let mut cards: Vec<CardSummary> = self
            .cards
            .values()
            .filter(|cached| predicate(&cached.meta))
            .map(|cached| cached.meta.clone())
            .collect();
        sort_recent_first(&mut cards);
        cards
    }

    /// Cards whose outbound links contain `id`.
    pub fn backlinks_of(&self, id: &str) -> Vec<CardSummary> {
        self.filtered(|card| card.links_to(id))
    }

    /// Cached metadata without hydration.
    pub fn summary(&self, id: &str) -> Option<CardSummary> {
        self.cards.get(id).map(|cached| cached.meta.clone())
    }

    /// Returns one card, fetching content from the backend on first access.
    pub fn get(&mut self, id: &str) -> StoreResult<Option<Card>> {
        validate_card_id(id)?;
        if let Some(card) = self.cards.get(id).and_then(CachedCard::to_card) {
            return Ok(Some(card));
        }

        match self.backend.get_card(id)? {
            Some(record) => {
                let outcome = self.merge_record(record);
                debug!("event=card_hydrate module=store status=ok card_id={id} merge={outcome:?}");
                Ok(self.cards.get(id).and_then(CachedCard::to_card))
            }
            None => {
                if self.evict(id) {
                    debug!(
                        "event=card_hydrate module=store status=skip card_id={id} reason=missing_on_backend"
                    );
                }
                Ok(None)
            }
        }
    }

    /// Creates a card with an empty document.
    pub fn create(
        &mut self,
        card_type: CardType,
        title: &str,
        source_id: Option<&str>,
    ) -> StoreResult<Card> {
        validate_title(title)?;
        let record = match self.backend.create_card(card_type, title, source_id) {
            Ok(record) => record,
            Err(err) => {
                warn!("event=card_create module=store status=error type={card_type} error={err}");
                return Err(err.into());
            }
        };
        validate_card_id(&record.id)?;

        let card = record.into_card();
        self.cards
            .insert(card.id.clone(), CachedCard::from_card(card.clone()));
        info!(
            "event=card_create module=store status=ok card_id={} type={}",
            card.id, card.card_type
        );
        Ok(card)
    }

    /// Applies a partial update to the cache, then commits it.
    ///
    /// An empty update is a no-op.
    pub fn update(&mut self, id: &str, update: CardUpdate) -> StoreResult<()> {
        if !self.cards.contains_key(id) {
            return Err(StoreError::CardNotFound(id.to_string()));
        }
        if update.is_empty() {
            return Ok(());
        }

        let serialized = update
            .content
            .as_ref()
            .map(Document::serialize)
            .transpose()?;
        let now = self.clock.now_ms();
        let mut patch = CardPatch {
            content: serialized,
            ..CardPatch::default()
        };

        if let Some(entry) = self.cards.get_mut(id) {
            if let Some(title) = update.title {
                entry.meta.title = title.clone();
                patch.title = Some(title);
            }
            if let Some(tags) = update.tags {
                let tags = normalize_tags(&tags);
                entry.meta.tags = tags.clone();
                patch.tags = Some(tags);
            }
            if let Some(card_type) = update.card_type {
                entry.meta.card_type = card_type;
                patch.card_type = Some(card_type);
            }
            if let Some(links) = update.links {
                let links = dedupe_links(&links);
                entry.meta.links = links.clone();
                patch.links = Some(links);
            }
            entry.meta.updated_at = now;
        }

        if let Some(content) = update.content {
            let links = extract_links(&content, &self.title_index());
            if let Some(entry) = self.cards.get_mut(id) {
                entry.meta.links = links.clone();
                entry.content = Some(content);
            }
            patch.links = Some(links);
        }

        self.commit_patch(id, &patch, "card_update")
    }

    /// Evicts a card and deletes it on the backend.
    ///
    /// With `cascade_delete_links` set, every referrer drops the id too.
    pub fn delete(&mut self, id: &str) -> StoreResult<()> {
        validate_card_id(id)?;
        let was_cached = self.evict(id);

        match self.backend.delete_card(id) {
            Ok(()) => {}
            Err(BackendError::NotFound(_)) if was_cached => {
                debug!("event=card_delete module=store status=skip card_id={id} reason=missing_on_backend");
            }
            Err(BackendError::NotFound(_)) => {
                return Err(StoreError::CardNotFound(id.to_string()));
            }
            Err(err) => {
                warn!(
                    "event=card_delete module=store status=error divergence=local_evicted card_id={id} error={err}"
                );
                return Err(err.into());
            }
        }
        info!("event=card_delete module=store status=ok card_id={id}");

        if self.config.cascade_delete_links {
            self.unlink_referrers(id)?;
        }
        Ok(())
    }

    /// Appends `card` to `container`'s links. Returns `false` when already
    /// present, in which case the backend is not called.
    pub fn add_reference(&mut self, container: &str, card: &str) -> StoreResult<bool> {
        validate_card_id(card)?;
        let now = self.clock.now_ms();
        let entry = self
            .cards
            .get_mut(container)
            .ok_or_else(|| StoreError::CardNotFound(container.to_string()))?;
        if entry.meta.links_to(card) {
            return Ok(false);
        }

        entry.meta.links.push(card.to_string());
        entry.meta.updated_at = now;
        let patch = CardPatch {
            links: Some(entry.meta.links.clone()),
            ..CardPatch::default()
        };
        self.commit_patch(container, &patch, "card_add_reference")?;
        Ok(true)
    }

    /// Removes `card` from `container`'s links. Returns `false` when absent,
    /// in which case the backend is not called.
    pub fn remove_reference(&mut self, container: &str, card: &str) -> StoreResult<bool> {
        let now = self.clock.now_ms();
        let entry = self
            .cards
            .get_mut(container)
            .ok_or_else(|| StoreError::CardNotFound(container.to_string()))?;
        if !entry.meta.links_to(card) {
            return Ok(false);
        }

        entry.meta.links.retain(|id| id != card);
        entry.meta.updated_at = now;
        let patch = CardPatch {
            links: Some(entry.meta.links.clone()),
            ..CardPatch::default()
        };
        self.commit_patch(container, &patch, "card_remove_reference")?;
        Ok(true)
    }

    pub fn select(&mut self, id: &str) -> StoreResult<()> {
        if !self.cards.contains_key(id) {
            return Err(StoreError::CardNotFound(id.to_string()));
        }
        self.selected = Some(id.to_string());
        Ok(())
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Plain-text preview of a hydrated card, cut to `max_len` characters.
    pub fn preview(&self, id: &str, max_len: usize) -> Option<String> {
        let content = self.cards.get(id)?.content.as_ref()?;
        Some(extract_plain_text(content, max_len))
    }

    /// Preview using `StoreConfig::preview_max_chars`.
    pub fn default_preview(&self, id: &str) -> Option<String> {
        self.preview(id, self.config.preview_max_chars)
    }

    /// Records a title keystroke for debounced autosave.
    pub fn edit_title(&mut self, id: &str, title: impl Into<String>) -> StoreResult<()> {
        self.record_edit(id, DraftEdit::Title(title.into()))
    }

    /// Records a content change for debounced autosave.
    pub fn edit_content(&mut self, id: &str, content: Document) -> StoreResult<()> {
        self.record_edit(id, DraftEdit::Content(content))
    }

    /// Commits every draft whose debounce deadline has passed.
    pub fn run_autosave(&mut self) -> Vec<AutosaveOutcome> {
        let due = self.autosave.due(self.clock.now_ms());
        due.iter().filter_map(|id| self.commit_draft(id)).collect()
    }

    /// Commits one draft immediately, ignoring its deadline.
    ///
    /// A draft left behind by a failed commit is retried too.
    pub fn flush_autosave(&mut self, id: &str) -> Option<AutosaveOutcome> {
        self.commit_draft(id)
    }

    /// Commits every pending or previously failed draft immediately.
    pub fn flush_all(&mut self) -> Vec<AutosaveOutcome> {
        let unsaved = self.autosave.unsaved_ids();
        unsaved
            .iter()
            .filter_map(|id| self.commit_draft(id))
            .collect()
    }

    pub fn autosave_state(&self, id: &str) -> AutosaveState {
        self.autosave.state(id)
    }

    pub fn has_pending_autosave(&self, id: &str) -> bool {
        self.autosave.is_pending(id)
    }

    /// Whether `id` holds edits the backend has not accepted yet.
    pub fn has_unsaved_changes(&self, id: &str) -> bool {
        self.autosave.has_unsaved(id)
    }

    /// Ids with edits the backend has not accepted yet, sorted.
    pub fn unsaved_ids(&self) -> Vec<CardId> {
        self.autosave.unsaved_ids()
    }

    /// Uncommitted title/content for `id`, if the card has been edited.
    pub fn draft(&self, id: &str) -> Option<&Snapshot> {
        self.autosave.draft(id)
    }

    /// Merges a record fetched outside the normal commit path.
    pub fn apply_external(&mut self, record: CardRecord) -> MergeOutcome {
        let id = record.id.clone();
        let outcome = self.merge_record(record);
        match outcome {
            MergeOutcome::KeptLocal => {
                debug!("event=external_merge module=store status=skip card_id={id} reason=local_newer")
            }
            _ => debug!("event=external_merge module=store status=ok card_id={id} merge={outcome:?}"),
        }
        outcome
    }

    /// Drops a card removed outside this process. Returns whether it was cached.
    pub fn evict_external(&mut self, id: &str) -> bool {
        let evicted = self.evict(id);
        if evicted {
            debug!("event=external_evict module=store status=ok card_id={id}");
        }
        evicted
    }

    /// Re-fetches one externally changed card and merges or evicts it.
    pub fn refresh_external(&mut self, id: &str) -> StoreResult<RefreshOutcome> {
        validate_card_id(id)?;
        match self.backend.get_card(id)? {
            Some(record) => Ok(RefreshOutcome::Merged(self.apply_external(record))),
            None => {
                self.evict_external(id);
                Ok(RefreshOutcome::Missing)
            }
        }
    }

    /// Exact-title index over every cached card.
    pub fn title_index(&self) -> TitleIndex {
        TitleIndex::from_summaries(self.cards.values().map(|cached| &cached.meta))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cards.contains_key(id)
    }

    pub fn is_hydrated(&self, id: &str) -> bool {
        self.cards
            .get(id)
            .is_some_and(|cached| cached.content.is_some())
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    fn record_edit(&mut self, id: &str, edit: DraftEdit) -> StoreResult<()> {
        let card = self
            .get(id)?
            .ok_or_else(|| StoreError::CardNotFound(id.to_string()))?;
        let now = self.clock.now_ms();
        self.autosave.record_edit(id, edit, now, || Snapshot {
            title: card.title,
            content: card.content,
        });
        debug!(
            "event=autosave_schedule module=autosave status=ok card_id={id} deadline_ms={}",
            now.saturating_add(self.autosave.debounce_ms())
        );
        Ok(())
    }

    fn commit_draft(&mut self, id: &str) -> Option<AutosaveOutcome> {
        let CommitPlan {
            title,
            content,
            draft,
        } = match self.autosave.begin_commit(id)? {
            CommitDecision::Unchanged => {
                debug!("event=autosave_commit module=autosave status=skip card_id={id} reason=unchanged");
                return Some(AutosaveOutcome::Unchanged(id.to_string()));
            }
            CommitDecision::Commit(plan) => plan,
        };

        let update = CardUpdate {
            title,
            content,
            ..CardUpdate::default()
        };
        let result = self.update(id, update);
        self.autosave.finish_commit(id, draft, result.is_ok());

        Some(match result {
            Ok(()) => {
                info!("event=autosave_commit module=autosave status=ok card_id={id}");
                AutosaveOutcome::Committed(id.to_string())
            }
            Err(error) => {
                warn!("event=autosave_commit module=autosave status=error card_id={id} error={error}");
                AutosaveOutcome::Failed {
                    card_id: id.to_string(),
                    error,
                }
            }
        })
    }

    fn commit_patch(&mut self, id: &str, patch: &CardPatch, event: &str) -> StoreResult<()> {
        match self.backend.update_card(id, patch) {
            Ok(record) => {
                if let Some(entry) = self.cards.get_mut(&record.id) {
                    if record.modified_at > entry.meta.updated_at {
                        entry.meta.updated_at = record.modified_at;
                    }
                }
                debug!("event={event} module=store status=ok card_id={id}");
                Ok(())
            }
            Err(err) => {
                warn!(
                    "event={event} module=store status=error divergence=local_ahead card_id={id} error={err}"
                );
                Err(err.into())
            }
        }
    }

    fn merge_record(&mut self, record: CardRecord) -> MergeOutcome {
        let id = record.id.clone();
        let pending = self.autosave.is_pending(&id);
        let Some(entry) = self.cards.get_mut(&id) else {
            self.cards
                .insert(id, CachedCard::from_card(record.into_card()));
            return MergeOutcome::Inserted;
        };

        if pending || entry.meta.updated_at > record.modified_at {
            entry.meta.created_at = record.created_at;
            entry.meta.source_id = record.source_id;
            if entry.content.is_none() {
                entry.content = Some(Document::parse(&record.content));
            }
            return MergeOutcome::KeptLocal;
        }

        *entry = CachedCard::from_card(record.into_card());
        self.autosave.forget_idle(&id);
        MergeOutcome::Replaced
    }

    fn evict(&mut self, id: &str) -> bool {
        let evicted = self.cards.remove(id).is_some();
        if self.autosave.cancel(id) {
            warn!("event=autosave_drop module=autosave status=skip card_id={id} reason=card_removed");
        }
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        evicted
    }

    fn unlink_referrers(&mut self, id: &str) -> StoreResult<()> {
        let referrers: Vec<CardId> = self
            .backlinks_of(id)
            .into_iter()
            .map(|card| card.id)
            .collect();

        let mut first_error = None;
        for referrer in referrers {
            if let Err(err) = self.remove_reference(&referrer, id) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn sort_recent_first(cards: &mut [CardSummary]) {
    cards.sort_by(|left, right| {
        right
            .updated_at
            .cmp(&left.updated_at)
            .then_with(|| left.id.cmp(&right.id))
    });
}
