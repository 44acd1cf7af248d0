//! Card cache, CRUD facade and autosave.
//!
//! # Responsibility
//! - `card_store`: cache + optimistic commits + external merge entry points.
//! - `autosave`: per-card debounce state machine driven by the store.

pub mod autosave;
pub mod card_store;

pub use autosave::{AutosaveScheduler, AutosaveState, Snapshot};
pub use card_store::{
    AutosaveOutcome, CardStore, CardUpdate, MergeOutcome, RefreshOutcome, StoreError, StoreResult,
};
