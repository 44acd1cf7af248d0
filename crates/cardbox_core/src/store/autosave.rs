//! Per-card debounced autosave state machine.
//!
//! # Responsibility
//! - Track the live draft and the last committed title/content per card.
//! - Decide when a commit is due and what it must carry.
//!
//! # Invariants
//! - `Idle -> Pending -> Committing -> Idle`; a new edit always re-arms the
//!   deadline (`Pending`) and never drops the previous draft's changes.
//! - At most one commit per card is outstanding.
//! - Entries are dropped once the committed snapshot matches the draft.
//! - An entry survives a failed commit as an `Idle` entry with unsaved
//!   changes; it is retried with the next edit or by a flush.
//!
//! This type never touches the backend; `CardStore` drives it.

use crate::model::card::CardId;
use crate::model::document::Document;
use std::collections::HashMap;

/// Title/content pair compared by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub title: String,
    pub content: Document,
}

/// One keystroke-level edit.
#[derive(Debug, Clone, PartialEq)]
pub enum DraftEdit {
    Title(String),
    Content(Document),
}

/// Observable scheduler state of one card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveState {
    Idle,
    Pending { deadline_ms: i64 },
    Committing,
}

/// Result of opening a commit for a due card.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitDecision {
    /// Draft equals the committed snapshot; card is back to `Idle`.
    Unchanged,
    /// Fields that differ from the committed snapshot.
    Commit(CommitPlan),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitPlan {
    pub title: Option<String>,
    pub content: Option<Document>,
    /// Draft being committed; becomes the snapshot on success.
    pub draft: Snapshot,
}

#[derive(Debug, Clone)]
struct PendingChange {
    state: AutosaveState,
    draft: Snapshot,
    committed: Snapshot,
    /// Set when an edit lands while the card is `Committing`.
    edited_during_commit: Option<i64>,
}

/// Debounce scheduler keyed by card id.
#[derive(Debug, Clone)]
pub struct AutosaveScheduler {
    debounce_ms: i64,
    entries: HashMap<CardId, PendingChange>,
}

impl AutosaveScheduler {
    pub fn new(debounce_ms: i64) -> Self {
        Self {
            debounce_ms,
            entries: HashMap::new(),
        }
    }

    pub fn debounce_ms(&self) -> i64 {
        self.debounce_ms
    }

    /// Records an edit and re-arms the debounce deadline.
    ///
    /// `baseline` supplies the committed title/content the first time a card
    /// is edited.
    pub fn record_edit(
        &mut self,
        id: &str,
        edit: DraftEdit,
        now_ms: i64,
        baseline: impl FnOnce() -> Snapshot,
    ) {
        let deadline_ms = now_ms.saturating_add(self.debounce_ms);
        let entry = self.entries.entry(id.to_string()).or_insert_with(|| {
            let committed = baseline();
            PendingChange {
                state: AutosaveState::Idle,
                draft: committed.clone(),
                committed,
                edited_during_commit: None,
            }
        });

        match edit {
            DraftEdit::Title(title) => entry.draft.title = title,
            DraftEdit::Content(content) => entry.draft.content = content,
        }

        if entry.state == AutosaveState::Committing {
            entry.edited_during_commit = Some(deadline_ms);
        } else {
            entry.state = AutosaveState::Pending { deadline_ms };
        }
    }

    pub fn state(&self, id: &str) -> AutosaveState {
        self.entries
            .get(id)
            .map_or(AutosaveState::Idle, |entry| entry.state)
    }

    /// `Pending` or `Committing`.
    pub fn is_pending(&self, id: &str) -> bool {
        !matches!(self.state(id), AutosaveState::Idle)
    }

    /// Live draft for a card with an open entry.
    pub fn draft(&self, id: &str) -> Option<&Snapshot> {
        self.entries.get(id).map(|entry| &entry.draft)
    }

    /// Cards whose deadline has passed, earliest first.
    pub fn due(&self, now_ms: i64) -> Vec<CardId> {
        let mut due: Vec<(i64, &CardId)> = self
            .entries
            .iter()
            .filter_map(|(id, entry)| match entry.state {
                AutosaveState::Pending { deadline_ms } if deadline_ms <= now_ms => {
                    Some((deadline_ms, id))
                }
                _ => None,
            })
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// Whether the draft for `id` differs from what the backend last accepted.
    pub fn has_unsaved(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.draft != entry.committed)
    }

    /// Cards a flush must commit: every `Pending` card plus `Idle` cards
    /// left dirty by a failed commit.
    pub fn unsaved_ids(&self) -> Vec<CardId> {
        let mut ids: Vec<CardId> = self
            .entries
            .iter()
            .filter(|(_, entry)| match entry.state {
                AutosaveState::Pending { .. } => true,
                AutosaveState::Idle => entry.draft != entry.committed,
                AutosaveState::Committing => false,
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Opens a commit for a card with an entry, ignoring its deadline.
    ///
    /// Returns `None` when the card has no entry or a commit is already open.
    pub fn begin_commit(&mut self, id: &str) -> Option<CommitDecision> {
        let entry = self.entries.get_mut(id)?;
        if entry.state == AutosaveState::Committing {
            return None;
        }

        if entry.draft == entry.committed {
            self.entries.remove(id);
            return Some(CommitDecision::Unchanged);
        }

        entry.state = AutosaveState::Committing;
        let title = (entry.draft.title != entry.committed.title).then(|| entry.draft.title.clone());
        let content =
            (entry.draft.content != entry.committed.content).then(|| entry.draft.content.clone());
        Some(CommitDecision::Commit(CommitPlan {
            title,
            content,
            draft: entry.draft.clone(),
        }))
    }

    /// Closes a commit opened by [`AutosaveScheduler::begin_commit`].
    pub fn finish_commit(&mut self, id: &str, committed_draft: Snapshot, succeeded: bool) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        if succeeded {
            entry.committed = committed_draft;
        }

        entry.state = match entry.edited_during_commit.take() {
            Some(deadline_ms) => AutosaveState::Pending { deadline_ms },
            None => AutosaveState::Idle,
        };

        if entry.state == AutosaveState::Idle && entry.draft == entry.committed {
            self.entries.remove(id);
        }
    }

    /// Drops any draft for `id`. Returns whether uncommitted edits were lost.
    pub fn cancel(&mut self, id: &str) -> bool {
        self.entries
            .remove(id)
            .is_some_and(|entry| entry.draft != entry.committed)
    }

    /// Forgets an idle entry after the card was replaced from the backend.
    pub fn forget_idle(&mut self, id: &str) {
        if self.state(id) == AutosaveState::Idle {
            self.entries.remove(id);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
