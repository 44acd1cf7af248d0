//! Backend boundary: the opaque CRUD + change-poll contract the store talks to.
//!
//! # Responsibility
//! - Define wire records exchanged with the source of truth.
//! - Define the `CardBackend` trait implemented by storage adapters.
//!
//! # Invariants
//! - Content crosses this boundary only in serialized form.
//! - The "since last poll" cursor is owned by the backend, not the caller.
//! - Backend errors are recoverable; nothing here is fatal to the process.

use crate::db::DbError;
use crate::model::card::{Card, CardId, CardSummary, CardType};
use crate::model::document::Document;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sqlite;

pub use sqlite::{SqliteCardBackend, JOURNAL_RETENTION_MS};

pub type BackendResult<T> = Result<T, BackendError>;

/// Failure reported by a backend call.
#[derive(Debug)]
pub enum BackendError {
    /// Target card does not exist on the backend.
    NotFound(CardId),
    /// Storage transport failure.
    Db(DbError),
    /// Persisted data violates the wire contract.
    InvalidData(String),
    /// Backend is not reachable (closed vault, remote outage).
    Unavailable(String),
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "card not found on backend: {id}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid backend card data: {message}"),
            Self::Unavailable(message) => write!(f, "backend unavailable: {message}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for BackendError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Metadata row returned by `list_cards`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMeta {
    pub id: CardId,
    #[serde(rename = "type")]
    pub card_type: CardType,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<CardId>,
    #[serde(default)]
    pub source_id: Option<String>,
    pub created_at: i64,
    pub modified_at: i64,
}

impl CardMeta {
    pub fn into_summary(self) -> CardSummary {
        CardSummary {
            id: self.id,
            card_type: self.card_type,
            title: self.title,
            tags: self.tags,
            links: self.links,
            source_id: self.source_id,
            created_at: self.created_at,
            updated_at: self.modified_at,
        }
    }
}

/// Full record returned by `get_card`, `create_card` and `update_card`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    pub id: CardId,
    #[serde(rename = "type")]
    pub card_type: CardType,
    pub title: String,
    /// Serialized document (or legacy plain text).
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<CardId>,
    #[serde(default)]
    pub source_id: Option<String>,
    pub created_at: i64,
    pub modified_at: i64,
}

impl CardRecord {
    /// Decodes the record into a cache card. Never fails: malformed content
    /// becomes the empty document.
    pub fn into_card(self) -> Card {
        Card {
            content: Document::parse(&self.content),
            id: self.id,
            card_type: self.card_type,
            title: self.title,
            tags: self.tags,
            links: self.links,
            source_id: self.source_id,
            created_at: self.created_at,
            updated_at: self.modified_at,
        }
    }
}

/// Partial update sent to `update_card`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Serialized document; always the wrapped `doc` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub card_type: Option<CardType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<CardId>>,
}

impl CardPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.tags.is_none()
            && self.card_type.is_none()
            && self.links.is_none()
    }
}

/// Ids touched outside this process since the previous poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub changed_ids: Vec<CardId>,
    pub removed_ids: Vec<CardId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed_ids.is_empty() && self.removed_ids.is_empty()
    }
}

/// Source-of-truth contract consumed by the card store.
///
/// Implementations may block; callers treat every method as a settled call.
pub trait CardBackend {
    /// Lists metadata for every card.
    fn list_cards(&self) -> BackendResult<Vec<CardMeta>>;
    /// Loads one full card, or `None` when it does not exist.
    fn get_card(&self, id: &str) -> BackendResult<Option<CardRecord>>;
    /// Creates a card with an empty document and fresh timestamps.
    fn create_card(
        &mut self,
        card_type: CardType,
        title: &str,
        source_id: Option<&str>,
    ) -> BackendResult<CardRecord>;
    /// Applies a partial update and returns the stored record.
    fn update_card(&mut self, id: &str, patch: &CardPatch) -> BackendResult<CardRecord>;
    /// Deletes one card.
    fn delete_card(&mut self, id: &str) -> BackendResult<()>;
    /// Returns ids changed/removed by other writers since the previous poll.
    fn poll_changes(&mut self) -> BackendResult<ChangeSet>;
}
