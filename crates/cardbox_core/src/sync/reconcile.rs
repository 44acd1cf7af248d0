//! Periodic reconciliation of out-of-band backend changes.
//!
//! # Responsibility
//! - Poll `CardBackend::poll_changes` on a fixed interval.
//! - Evict removed cards and re-fetch changed ones through the store's
//!   external merge entry points.
//!
//! # Invariants
//! - `start` and `stop` are idempotent.
//! - A stop requested mid-poll is honoured before the next fetch.
//! - Poll and fetch failures are logged and skipped; the next interval retries.
//! - The engine never edits cache entries directly.

use crate::backend::CardBackend;
use crate::model::card::CardId;
use crate::store::{CardStore, MergeOutcome, RefreshOutcome};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable stop switch shared with code running inside a poll.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStatus {
    Completed,
    /// `poll_changes` failed; nothing was applied.
    PollFailed,
    /// Stopped before every changed card was fetched.
    Aborted,
}

/// What one poll applied to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub status: ReconcileStatus,
    /// Cards removed from the cache.
    pub evicted: Vec<CardId>,
    /// Cards inserted or replaced from backend records.
    pub merged: Vec<CardId>,
    /// Cards whose local fields were kept by the staleness guard.
    pub kept_local: Vec<CardId>,
    /// Cards whose fetch failed.
    pub failed: Vec<CardId>,
}

impl ReconcileReport {
    fn new(status: ReconcileStatus) -> Self {
        Self {
            status,
            evicted: Vec::new(),
            merged: Vec::new(),
            kept_local: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Interval-driven poller. Time comes from the store's clock.
#[derive(Debug)]
pub struct ReconcileEngine {
    interval_ms: i64,
    next_due_ms: Option<i64>,
    stop: StopHandle,
}

impl ReconcileEngine {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms,
            next_due_ms: None,
            stop: StopHandle::default(),
        }
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    /// Schedules the first poll one interval after `now_ms`.
    ///
    /// Returns `false` when already running.
    pub fn start(&mut self, now_ms: i64) -> bool {
        if self.is_running() {
            return false;
        }
        self.stop.reset();
        self.next_due_ms = Some(now_ms.saturating_add(self.interval_ms));
        info!(
            "event=reconcile_start module=reconcile status=ok interval_ms={}",
            self.interval_ms
        );
        true
    }

    /// Returns `false` when already stopped.
    pub fn stop(&mut self) -> bool {
        let was_running = self.is_running();
        self.stop.stop();
        self.next_due_ms = None;
        if was_running {
            info!("event=reconcile_stop module=reconcile status=ok");
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.next_due_ms.is_some() && !self.stop.is_stopped()
    }

    pub fn next_due_ms(&self) -> Option<i64> {
        self.next_due_ms.filter(|_| !self.stop.is_stopped())
    }

    /// Handle that stops this engine from anywhere, including mid-poll.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Polls when running and due. Returns `None` otherwise.
    pub fn tick<B: CardBackend>(&mut self, store: &mut CardStore<B>) -> Option<ReconcileReport> {
        let due_ms = self.next_due_ms?;
        if self.stop.is_stopped() {
            self.next_due_ms = None;
            return None;
        }

        let now_ms = store.clock().now_ms();
        if now_ms < due_ms {
            return None;
        }
        self.next_due_ms = Some(now_ms.saturating_add(self.interval_ms));
        Some(self.poll_once(store))
    }

    /// Runs one poll immediately, independent of the schedule.
    pub fn poll_once<B: CardBackend>(&mut self, store: &mut CardStore<B>) -> ReconcileReport {
        debug!("event=reconcile_poll module=reconcile status=start");
        let changes = match store.backend_mut().poll_changes() {
            Ok(changes) => changes,
            Err(err) => {
                warn!("event=reconcile_poll module=reconcile status=error error={err}");
                return ReconcileReport::new(ReconcileStatus::PollFailed);
            }
        };

        let mut report = ReconcileReport::new(ReconcileStatus::Completed);
        if self.abort_requested() {
            report.status = ReconcileStatus::Aborted;
            return report;
        }

        for id in changes.removed_ids {
            if store.evict_external(&id) {
                report.evicted.push(id);
            }
        }

        for id in changes.changed_ids {
            if self.abort_requested() {
                report.status = ReconcileStatus::Aborted;
                break;
            }
            match store.refresh_external(&id) {
                Ok(RefreshOutcome::Merged(MergeOutcome::KeptLocal)) => report.kept_local.push(id),
                Ok(RefreshOutcome::Merged(_)) => report.merged.push(id),
                Ok(RefreshOutcome::Missing) => report.evicted.push(id),
                Err(err) => {
                    warn!(
                        "event=reconcile_fetch module=reconcile status=error card_id={id} error={err}"
                    );
                    report.failed.push(id);
                }
            }
        }

        info!(
            "event=reconcile_poll module=reconcile status={} merged={} kept_local={} evicted={} failed={}",
            match report.status {
                ReconcileStatus::Aborted => "aborted",
                _ => "ok",
            },
            report.merged.len(),
            report.kept_local.len(),
            report.evicted.len(),
            report.failed.len()
        );
        report
    }

    fn abort_requested(&mut self) -> bool {
        if self.stop.is_stopped() {
            self.next_due_ms = None;
            return true;
        }
        false
    }
}
