#![allow(dead_code)]

use cardbox_core::{
    BackendError, BackendResult, CardBackend, CardId, CardMeta, CardPatch, CardRecord, CardStore,
    CardType, ChangeSet, Clock, Document, ManualClock, SharedClock, StopHandle, StoreConfig,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Backend call observed by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    Get(CardId),
    Create(String),
    Update(CardId, CardPatch),
    Delete(CardId),
    Poll,
}

/// In-memory backend that records calls and can inject failures.
pub struct MockBackend {
    clock: ManualClock,
    pub cards: BTreeMap<CardId, CardRecord>,
    calls: RefCell<Vec<Call>>,
    pub fail_updates: bool,
    pub fail_polls: bool,
    pub polls: VecDeque<ChangeSet>,
    /// Triggered on every `get_card`, simulating a stop while a poll runs.
    pub stop_on_get: Option<StopHandle>,
    next_id: u32,
}

impl MockBackend {
    pub fn new(clock: &ManualClock) -> Self {
        Self {
            clock: clock.clone(),
            cards: BTreeMap::new(),
            calls: RefCell::new(Vec::new()),
            fail_updates: false,
            fail_polls: false,
            polls: VecDeque::new(),
            stop_on_get: None,
            next_id: 0,
        }
    }

    /// Inserts a card as if another process had written it.
    pub fn seed(&mut self, id: &str, title: &str, content: &str, modified_at: i64) {
        self.cards.insert(
            id.to_string(),
            CardRecord {
                id: id.to_string(),
                card_type: CardType::Permanent,
                title: title.to_string(),
                content: content.to_string(),
                tags: vec![],
                links: vec![],
                source_id: None,
                created_at: modified_at,
                modified_at,
            },
        );
    }

    /// Edits a stored card out of band.
    pub fn external_retitle(&mut self, id: &str, title: &str, modified_at: i64) {
        let record = self.cards.get_mut(id).expect("seeded card");
        record.title = title.to_string();
        record.modified_at = modified_at;
    }

    pub fn script_poll(&mut self, changed: &[&str], removed: &[&str]) {
        self.polls.push_back(ChangeSet {
            changed_ids: changed.iter().map(|id| id.to_string()).collect(),
            removed_ids: removed.iter().map(|id| id.to_string()).collect(),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn update_calls(&self) -> Vec<(CardId, CardPatch)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Update(id, patch) => Some((id.clone(), patch.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

impl CardBackend for MockBackend {
    fn list_cards(&self) -> BackendResult<Vec<CardMeta>> {
        self.record(Call::List);
        Ok(self
            .cards
            .values()
            .map(|record| CardMeta {
                id: record.id.clone(),
                card_type: record.card_type,
                title: record.title.clone(),
                tags: record.tags.clone(),
                links: record.links.clone(),
                source_id: record.source_id.clone(),
                created_at: record.created_at,
                modified_at: record.modified_at,
            })
            .collect())
    }

    fn get_card(&self, id: &str) -> BackendResult<Option<CardRecord>> {
        self.record(Call::Get(id.to_string()));
        if let Some(handle) = &self.stop_on_get {
            handle.stop();
        }
        Ok(self.cards.get(id).cloned())
    }

    fn create_card(
        &mut self,
        card_type: CardType,
        title: &str,
        source_id: Option<&str>,
    ) -> BackendResult<CardRecord> {
        self.record(Call::Create(title.to_string()));
        self.next_id += 1;
        let now = self.clock.now_ms();
        let record = CardRecord {
            id: format!("card-{}", self.next_id),
            card_type,
            title: title.to_string(),
            content: Document::empty().serialize().expect("empty doc"),
            tags: vec![],
            links: vec![],
            source_id: source_id.map(str::to_string),
            created_at: now,
            modified_at: now,
        };
        self.cards.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update_card(&mut self, id: &str, patch: &CardPatch) -> BackendResult<CardRecord> {
        self.record(Call::Update(id.to_string(), patch.clone()));
        if self.fail_updates {
            return Err(BackendError::Unavailable("injected update failure".to_string()));
        }
        let now = self.clock.now_ms();
        let record = self
            .cards
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        if let Some(title) = &patch.title {
            record.title = title.clone();
        }
        if let Some(content) = &patch.content {
            record.content = content.clone();
        }
        if let Some(tags) = &patch.tags {
            record.tags = tags.clone();
        }
        if let Some(card_type) = patch.card_type {
            record.card_type = card_type;
        }
        if let Some(links) = &patch.links {
            record.links = links.clone();
        }
        record.modified_at = now;
        Ok(record.clone())
    }

    fn delete_card(&mut self, id: &str) -> BackendResult<()> {
        self.record(Call::Delete(id.to_string()));
        self.cards
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    fn poll_changes(&mut self) -> BackendResult<ChangeSet> {
        self.record(Call::Poll);
        if self.fail_polls {
            return Err(BackendError::Unavailable("injected poll failure".to_string()));
        }
        Ok(self.polls.pop_front().unwrap_or_default())
    }
}

pub fn shared(clock: &ManualClock) -> SharedClock {
    Arc::new(clock.clone())
}

pub fn mock_store(clock: &ManualClock) -> CardStore<MockBackend> {
    CardStore::new(
        MockBackend::new(clock),
        shared(clock),
        StoreConfig::default(),
    )
}

pub fn store_with(backend: MockBackend, clock: &ManualClock) -> CardStore<MockBackend> {
    CardStore::new(backend, shared(clock), StoreConfig::default())
}
