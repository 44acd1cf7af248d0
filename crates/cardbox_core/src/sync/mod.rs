//! Out-of-band change reconciliation.
//!
//! Edits made by other processes sharing the backend are observed here by
//! polling, never pushed.

pub mod reconcile;

pub use reconcile::{ReconcileEngine, ReconcileReport, ReconcileStatus, StopHandle};
