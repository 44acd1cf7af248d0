//! Open vault: one card store plus its reconciliation engine.
//!
//! # Responsibility
//! - Tie the store and reconcile lifetimes to an explicit open/close pair.
//! - Drive one event-loop turn per `pump` (due autosaves, then a poll).
//!
//! # Invariants
//! - Reconciliation runs only between `open` and `close`.
//! - `close` commits every pending draft before the backend is released.

use crate::backend::{CardBackend, SqliteCardBackend};
use crate::clock::SharedClock;
use crate::config::StoreConfig;
use crate::store::{AutosaveOutcome, CardStore, StoreResult};
use crate::sync::{ReconcileEngine, ReconcileReport};
use log::{info, warn};
use std::path::Path;

/// Work done by one [`Vault::pump`] turn.
#[derive(Debug, Default)]
pub struct PumpReport {
    pub autosave: Vec<AutosaveOutcome>,
    pub reconcile: Option<ReconcileReport>,
}

/// Store + reconcile engine with an explicit lifetime.
pub struct Vault<B: CardBackend> {
    store: CardStore<B>,
    engine: ReconcileEngine,
}

impl<B: CardBackend> Vault<B> {
    /// Loads the card index and starts reconciliation.
    pub fn open(backend: B, clock: SharedClock, config: StoreConfig) -> StoreResult<Self> {
        let mut engine = ReconcileEngine::new(config.poll_interval_ms);
        let mut store = CardStore::new(backend, clock, config);
        let count = store.load()?;
        engine.start(store.clock().now_ms());
        info!("event=vault_open module=store status=ok count={count}");
        Ok(Self { store, engine })
    }

    pub fn store(&self) -> &CardStore<B> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CardStore<B> {
        &mut self.store
    }

    pub fn engine(&self) -> &ReconcileEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ReconcileEngine {
        &mut self.engine
    }

    /// Commits due drafts, then polls if the interval has elapsed.
    pub fn pump(&mut self) -> PumpReport {
        let autosave = self.store.run_autosave();
        let reconcile = self.engine.tick(&mut self.store);
        PumpReport {
            autosave,
            reconcile,
        }
    }

    /// Flushes drafts, stops reconciliation and hands the backend back.
    pub fn close(mut self) -> (Vec<AutosaveOutcome>, B) {
        self.engine.stop();
        let flushed = self.store.flush_all();
        let failed = flushed
            .iter()
            .filter(|outcome| matches!(outcome, AutosaveOutcome::Failed { .. }))
            .count();
        if failed > 0 {
            warn!(
                "event=vault_close module=store status=error flushed={} failed={failed}",
                flushed.len()
            );
        } else {
            info!(
                "event=vault_close module=store status=ok flushed={}",
                flushed.len()
            );
        }
        (flushed, self.store.into_backend())
    }
}

impl Vault<SqliteCardBackend> {
    /// Opens (creating if needed) a vault database file.
    pub fn open_file(
        path: impl AsRef<Path>,
        clock: SharedClock,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let backend = SqliteCardBackend::open(path, clock.clone())?;
        Self::open(backend, clock, config)
    }
}
