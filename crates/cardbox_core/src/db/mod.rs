//! SQLite storage layer for the vault backend.
//!
//! # Responsibility
//! - Open and migrate vault connections (`open`, `migrations`).
//! - Own schema-level checks and maintenance of the `card_changes` journal
//!   that do not depend on card semantics.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version`.
//! - Journal pruning only removes entries by age; `seq` values are never
//!   reused, so poll cursors stay valid after a prune.

use log::info;
use rusqlite::{params, Connection};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

/// Tables every vault connection must carry.
pub const VAULT_TABLES: &[&str] = &["cards", "card_changes"];

pub type DbResult<T> = Result<T, DbError>;

/// Storage-level failure.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The file was written by a newer build.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Connection was never migrated, or a vault table was dropped.
    MissingTable(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "vault schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::MissingTable(table) => write!(f, "missing required table `{table}`"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::MissingTable(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Fails with [`DbError::MissingTable`] on the first absent table.
pub fn require_tables(conn: &Connection, tables: &[&str]) -> DbResult<()> {
    for table in tables {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
            [table],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(DbError::MissingTable((*table).to_string()));
        }
    }
    Ok(())
}

/// Deletes journal entries recorded before `cutoff_ms`. Returns the count.
pub fn prune_change_journal(conn: &Connection, cutoff_ms: i64) -> DbResult<usize> {
    let removed = conn.execute(
        "DELETE FROM card_changes WHERE recorded_at < ?1;",
        params![cutoff_ms],
    )?;
    if removed > 0 {
        info!("event=journal_prune module=db status=ok removed={removed} cutoff_ms={cutoff_ms}");
    }
    Ok(removed)
}
