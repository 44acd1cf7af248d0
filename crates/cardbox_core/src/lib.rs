//! Local-first card store core.
//!
//! Structured-document content, link extraction, a cached card store with
//! debounced autosave, and reconciliation against a pluggable backend.

pub mod backend;
pub mod clock;
pub mod config;
pub mod db;
pub mod links;
pub mod logging;
pub mod model;
pub mod store;
pub mod sync;
pub mod vault;

pub use backend::{
    BackendError, BackendResult, CardBackend, CardMeta, CardPatch, CardRecord, ChangeSet,
    SqliteCardBackend, JOURNAL_RETENTION_MS,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigError, StoreConfig};
pub use links::extractor::{extract_links, TitleIndex};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::card::{Card, CardId, CardSummary, CardType, CardValidationError};
pub use model::document::{extract_plain_text, Document, Mark, MarkKind, Node, NodeKind};
pub use store::{
    AutosaveOutcome, AutosaveState, CardStore, CardUpdate, MergeOutcome, RefreshOutcome,
    StoreError, StoreResult,
};
pub use sync::{ReconcileEngine, ReconcileReport, ReconcileStatus, StopHandle};
pub use vault::{PumpReport, Vault};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
