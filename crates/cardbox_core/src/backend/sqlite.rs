//! SQLite vault backend with a change journal.
//!
//! # Responsibility
//! - Persist cards in a single vault database file.
//! - Journal every write with the writer's origin id so `poll_changes` can
//!   report edits made by other processes sharing the same file.
//!
//! # Invariants
//! - Each backend instance has a unique origin; its own writes are never
//!   reported back by its own `poll_changes`.
//! - The poll cursor starts at the journal head when the backend is opened.
//! - Opening a backend prunes journal entries older than
//!   [`JOURNAL_RETENTION_MS`]; peers poll far more often than that.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::backend::{
    BackendError, BackendResult, CardBackend, CardMeta, CardPatch, CardRecord, ChangeSet,
};
use crate::clock::SharedClock;
use crate::db::{
    open_db, open_db_in_memory, prune_change_journal, require_tables, VAULT_TABLES,
};
use crate::model::card::{CardId, CardType};
use crate::model::document::Document;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

const CARD_META_COLUMNS: &str =
    "id, type, title, tags, links, source_id, created_at, modified_at";
const CARD_RECORD_COLUMNS: &str =
    "id, type, title, content, tags, links, source_id, created_at, modified_at";

/// Age after which journal entries are dropped (seven days).
pub const JOURNAL_RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1_000;

const CHANGE_UPSERT: &str = "upsert";
const CHANGE_REMOVE: &str = "remove";

/// SQLite-backed implementation of [`CardBackend`].
pub struct SqliteCardBackend {
    conn: Connection,
    clock: SharedClock,
    origin: String,
    cursor: i64,
}

impl SqliteCardBackend {
    /// Opens (or creates) the vault file at `path`.
    pub fn open(path: impl AsRef<Path>, clock: SharedClock) -> BackendResult<Self> {
        Self::try_new(open_db(path)?, clock)
    }

    /// Opens a private in-memory vault.
    pub fn open_in_memory(clock: SharedClock) -> BackendResult<Self> {
        Self::try_new(open_db_in_memory()?, clock)
    }

    /// Wraps a migrated connection and prunes the change journal.
    pub fn try_new(conn: Connection, clock: SharedClock) -> BackendResult<Self> {
        require_tables(&conn, VAULT_TABLES)?;
        let cutoff = clock.now_ms().saturating_sub(JOURNAL_RETENTION_MS);
        prune_change_journal(&conn, cutoff)?;
        let cursor = journal_head(&conn)?;
        Ok(Self {
            conn,
            clock,
            origin: Uuid::new_v4().to_string(),
            cursor,
        })
    }

    /// Writer identity recorded in the change journal.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn record_change(
        conn: &Connection,
        id: &str,
        kind: &str,
        origin: &str,
        now: i64,
    ) -> BackendResult<()> {
        conn.execute(
            "INSERT INTO card_changes (card_id, kind, origin, recorded_at)
             VALUES (?1, ?2, ?3, ?4);",
            params![id, kind, origin, now],
        )?;
        Ok(())
    }
}

impl CardBackend for SqliteCardBackend {
    fn list_cards(&self) -> BackendResult<Vec<CardMeta>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CARD_META_COLUMNS} FROM cards ORDER BY modified_at DESC, id ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut cards = Vec::new();
        while let Some(row) = rows.next()? {
            cards.push(parse_meta_row(row)?);
        }
        Ok(cards)
    }

    fn get_card(&self, id: &str) -> BackendResult<Option<CardRecord>> {
        load_record(&self.conn, id)
    }

    fn create_card(
        &mut self,
        card_type: CardType,
        title: &str,
        source_id: Option<&str>,
    ) -> BackendResult<CardRecord> {
        let now = self.clock.now_ms();
        let content = Document::empty()
            .serialize()
            .map_err(|err| BackendError::InvalidData(err.to_string()))?;
        let record = CardRecord {
            id: Uuid::new_v4().to_string(),
            card_type,
            title: title.to_string(),
            content,
            tags: Vec::new(),
            links: Vec::new(),
            source_id: source_id.map(str::to_string),
            created_at: now,
            modified_at: now,
        };

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO cards (id, type, title, content, tags, links, source_id, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, '[]', '[]', ?5, ?6, ?7);",
            params![
                record.id,
                record.card_type.as_str(),
                record.title,
                record.content,
                record.source_id,
                record.created_at,
                record.modified_at,
            ],
        )?;
        Self::record_change(&tx, &record.id, CHANGE_UPSERT, &self.origin, now)?;
        tx.commit()?;

        debug!("event=card_create module=backend status=ok card_id={}", record.id);
        Ok(record)
    }

    fn update_card(&mut self, id: &str, patch: &CardPatch) -> BackendResult<CardRecord> {
        let now = self.clock.now_ms();
        let tx = self.conn.transaction()?;
        let mut record =
            load_record(&tx, id)?.ok_or_else(|| BackendError::NotFound(id.to_string()))?;

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

        tx.execute(
            "UPDATE cards
             SET type = ?2, title = ?3, content = ?4, tags = ?5, links = ?6, modified_at = ?7
             WHERE id = ?1;",
            params![
                record.id,
                record.card_type.as_str(),
                record.title,
                record.content,
                encode_list(&record.tags)?,
                encode_list(&record.links)?,
                record.modified_at,
            ],
        )?;
        Self::record_change(&tx, id, CHANGE_UPSERT, &self.origin, now)?;
        tx.commit()?;

        Ok(record)
    }

    fn delete_card(&mut self, id: &str) -> BackendResult<()> {
        let now = self.clock.now_ms();
        let tx = self.conn.transaction()?;
        let changed = tx.execute("DELETE FROM cards WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(BackendError::NotFound(id.to_string()));
        }
        Self::record_change(&tx, id, CHANGE_REMOVE, &self.origin, now)?;
        tx.commit()?;
        Ok(())
    }

    fn poll_changes(&mut self) -> BackendResult<ChangeSet> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, card_id, kind, origin
             FROM card_changes
             WHERE seq > ?1
             ORDER BY seq ASC;",
        )?;
        let mut rows = stmt.query([self.cursor])?;

        let mut order: Vec<CardId> = Vec::new();
        let mut latest: HashMap<CardId, bool> = HashMap::new();
        let mut cursor = self.cursor;
        while let Some(row) = rows.next()? {
            cursor = row.get("seq")?;
            let origin: String = row.get("origin")?;
            if origin == self.origin {
                continue;
            }
            let card_id: String = row.get("card_id")?;
            let kind: String = row.get("kind")?;
            let removed = match kind.as_str() {
                CHANGE_UPSERT => false,
                CHANGE_REMOVE => true,
                other => {
                    return Err(BackendError::InvalidData(format!(
                        "invalid change kind `{other}` in card_changes.kind"
                    )));
                }
            };
            if latest.insert(card_id.clone(), removed).is_none() {
                order.push(card_id);
            }
        }
        drop(rows);
        drop(stmt);
        self.cursor = cursor;

        let mut changes = ChangeSet::default();
        for id in order {
            match latest.get(&id) {
                Some(true) => changes.removed_ids.push(id),
                Some(false) => changes.changed_ids.push(id),
                None => {}
            }
        }
        Ok(changes)
    }
}

fn load_record(conn: &Connection, id: &str) -> BackendResult<Option<CardRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CARD_RECORD_COLUMNS} FROM cards WHERE id = ?1;"
    ))?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_record_row(row)?)),
        None => Ok(None),
    }
}

fn parse_meta_row(row: &Row<'_>) -> BackendResult<CardMeta> {
    Ok(CardMeta {
        id: row.get("id")?,
        card_type: parse_card_type(&row.get::<_, String>("type")?)?,
        title: row.get("title")?,
        tags: decode_list(&row.get::<_, String>("tags")?, "tags")?,
        links: decode_list(&row.get::<_, String>("links")?, "links")?,
        source_id: row.get("source_id")?,
        created_at: row.get("created_at")?,
        modified_at: row.get("modified_at")?,
    })
}

fn parse_record_row(row: &Row<'_>) -> BackendResult<CardRecord> {
    let meta = parse_meta_row(row)?;
    Ok(CardRecord {
        content: row.get("content")?,
        id: meta.id,
        card_type: meta.card_type,
        title: meta.title,
        tags: meta.tags,
        links: meta.links,
        source_id: meta.source_id,
        created_at: meta.created_at,
        modified_at: meta.modified_at,
    })
}

fn parse_card_type(value: &str) -> BackendResult<CardType> {
    CardType::parse(value).ok_or_else(|| {
        BackendError::InvalidData(format!("invalid card type `{value}` in cards.type"))
    })
}

fn decode_list(raw: &str, column: &str) -> BackendResult<Vec<String>> {
    serde_json::from_str(raw).map_err(|err| {
        BackendError::InvalidData(format!("invalid json list in cards.{column}: {err}"))
    })
}

fn encode_list(values: &[String]) -> BackendResult<String> {
    serde_json::to_string(values).map_err(|err| BackendError::InvalidData(err.to_string()))
}

fn journal_head(conn: &Connection) -> BackendResult<i64> {
    let head: Option<i64> = conn
        .query_row("SELECT MAX(seq) FROM card_changes;", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(head.unwrap_or(0))
}
