mod common;

use cardbox_core::{
    AutosaveOutcome, CardUpdate, ManualClock, ReconcileEngine, ReconcileStatus, StoreConfig, Vault,
};
use common::{shared, store_with, Call, MockBackend};

fn seeded(clock: &ManualClock, ids: &[&str]) -> MockBackend {
    let mut backend = MockBackend::new(clock);
    for id in ids {
        backend.seed(id, &format!("Title {id}"), "", 10);
    }
    backend
}

#[test]
fn removed_selected_card_is_evicted_and_unselected() {
    let clock = ManualClock::new(0);
    let mut store = store_with(seeded(&clock, &["x", "y"]), &clock);
    store.load().unwrap();
    store.select("x").unwrap();
    store.backend_mut().script_poll(&[], &["x"]);

    let mut engine = ReconcileEngine::new(2_000);
    engine.start(0);
    clock.set(2_000);
    let report = engine.tick(&mut store).unwrap();

    assert_eq!(report.status, ReconcileStatus::Completed);
    assert_eq!(report.evicted, vec!["x".to_string()]);
    assert!(!store.contains("x"));
    assert!(store.contains("y"));
    assert_eq!(store.selected(), None);
}

#[test]
fn pending_edit_keeps_local_fields() {
    let clock = ManualClock::new(0);
    let mut store = store_with(seeded(&clock, &["c"]), &clock);
    store.load().unwrap();

    clock.set(100);
    store.edit_title("c", "Mine").unwrap();
    store.backend_mut().external_retitle("c", "Theirs", 200);
    store.backend_mut().cards.get_mut("c").unwrap().source_id = Some("src".to_string());
    store.backend_mut().script_poll(&["c"], &[]);

    let mut engine = ReconcileEngine::new(2_000);
    let report = engine.poll_once(&mut store);
    assert_eq!(report.kept_local, vec!["c".to_string()]);

    let cached = store.summary("c").unwrap();
    assert_eq!(cached.title, "Title c");
    assert_eq!(cached.source_id.as_deref(), Some("src"));
    assert_eq!(store.draft("c").unwrap().title, "Mine");

    clock.set(600);
    assert!(store.run_autosave()[0].is_committed());
    assert_eq!(store.backend().cards["c"].title, "Mine");
}

#[test]
fn newer_local_timestamp_wins_over_stale_record() {
    let clock = ManualClock::new(0);
    let mut store = store_with(seeded(&clock, &["c"]), &clock);
    store.load().unwrap();

    clock.set(300);
    store
        .update(
            "c",
            CardUpdate {
                title: Some("Local".to_string()),
                ..CardUpdate::default()
            },
        )
        .unwrap();
    store.backend_mut().external_retitle("c", "Stale", 200);
    store.backend_mut().script_poll(&["c"], &[]);

    let report = ReconcileEngine::new(2_000).poll_once(&mut store);
    assert_eq!(report.kept_local, vec!["c".to_string()]);
    let cached = store.summary("c").unwrap();
    assert_eq!(cached.title, "Local");
    assert_eq!(cached.updated_at, 300);
}

#[test]
fn idle_card_takes_external_record() {
    let clock = ManualClock::new(0);
    let mut store = store_with(seeded(&clock, &["c"]), &clock);
    store.load().unwrap();
    assert!(!store.contains("late"));

    store.backend_mut().external_retitle("c", "Theirs", 50);
    store.backend_mut().seed("late", "Late arrival", "hello", 60);
    store.backend_mut().script_poll(&["c", "late"], &[]);

    let report = ReconcileEngine::new(2_000).poll_once(&mut store);
    assert_eq!(report.merged, vec!["c".to_string(), "late".to_string()]);
    assert_eq!(store.summary("c").unwrap().title, "Theirs");
    assert!(store.is_hydrated("c"));
    assert_eq!(store.preview("late", 100).as_deref(), Some("hello"));
}

#[test]
fn stop_during_poll_aborts_before_next_fetch() {
    let clock = ManualClock::new(0);
    let mut store = store_with(seeded(&clock, &["a", "b"]), &clock);
    store.load().unwrap();
    store.backend_mut().external_retitle("a", "A2", 50);
    store.backend_mut().external_retitle("b", "B2", 50);
    store.backend_mut().script_poll(&["a", "b"], &[]);

    let mut engine = ReconcileEngine::new(2_000);
    engine.start(0);
    store.backend_mut().stop_on_get = Some(engine.stop_handle());
    clock.set(2_000);

    let report = engine.tick(&mut store).unwrap();
    assert_eq!(report.status, ReconcileStatus::Aborted);
    assert_eq!(report.merged, vec!["a".to_string()]);
    assert_eq!(store.summary("b").unwrap().title, "Title b");
    assert!(!engine.is_running());

    clock.set(10_000);
    assert!(engine.tick(&mut store).is_none());
}

#[test]
fn failing_poll_is_skipped_and_retried_next_interval() {
    let clock = ManualClock::new(0);
    let mut store = store_with(seeded(&clock, &["c"]), &clock);
    store.load().unwrap();
    store.backend_mut().fail_polls = true;

    let mut engine = ReconcileEngine::new(2_000);
    engine.start(0);
    clock.set(2_000);
    let failed = engine.tick(&mut store).unwrap();
    assert_eq!(failed.status, ReconcileStatus::PollFailed);
    assert!(engine.is_running());
    assert_eq!(engine.next_due_ms(), Some(4_000));

    store.backend_mut().fail_polls = false;
    store.backend_mut().external_retitle("c", "Later", 3_000);
    store.backend_mut().script_poll(&["c"], &[]);
    clock.set(4_000);
    let retried = engine.tick(&mut store).unwrap();
    assert_eq!(retried.status, ReconcileStatus::Completed);
    assert_eq!(store.summary("c").unwrap().title, "Later");
}

#[test]
fn vault_pumps_autosave_then_reconcile_and_flushes_on_close() {
    let clock = ManualClock::new(0);
    let config = StoreConfig::default();
    let mut vault = Vault::open(seeded(&clock, &["a", "b"]), shared(&clock), config).unwrap();
    assert_eq!(vault.store().len(), 2);
    assert!(vault.engine().is_running());

    vault.store_mut().edit_title("a", "A!").unwrap();
    clock.set(500);
    let turn = vault.pump();
    assert_eq!(turn.autosave.len(), 1);
    assert!(turn.reconcile.is_none());

    vault.store_mut().backend_mut().script_poll(&[], &["b"]);
    clock.set(2_000);
    let turn = vault.pump();
    assert_eq!(turn.reconcile.unwrap().evicted, vec!["b".to_string()]);

    vault.store_mut().edit_title("a", "A!!").unwrap();
    let (flushed, backend) = vault.close();
    assert_eq!(flushed.len(), 1);
    assert_eq!(backend.cards["a"].title, "A!!");
    let polls = backend
        .calls()
        .into_iter()
        .filter(|call| *call == Call::Poll)
        .count();
    assert_eq!(polls, 1);
}

#[test]
fn close_retries_a_draft_whose_autosave_failed() {
    let clock = ManualClock::new(0);
    let mut vault = Vault::open(
        seeded(&clock, &["a"]),
        shared(&clock),
        StoreConfig::default(),
    )
    .unwrap();
    vault.store_mut().backend_mut().fail_updates = true;
    vault.store_mut().edit_title("a", "After").unwrap();

    clock.set(500);
    let turn = vault.pump();
    assert!(!turn.autosave[0].is_committed());
    assert!(vault.store().has_unsaved_changes("a"));
    assert!(!vault.store().has_pending_autosave("a"));

    clock.set(1_000);
    assert!(vault.pump().autosave.is_empty());

    vault.store_mut().backend_mut().fail_updates = false;
    let (flushed, backend) = vault.close();
    assert_eq!(flushed.len(), 1);
    assert!(flushed[0].is_committed());
    assert_eq!(backend.cards["a"].title, "After");
}

#[test]
fn close_reports_drafts_it_still_cannot_save() {
    let clock = ManualClock::new(0);
    let mut vault = Vault::open(
        seeded(&clock, &["a"]),
        shared(&clock),
        StoreConfig::default(),
    )
    .unwrap();
    vault.store_mut().backend_mut().fail_updates = true;
    vault.store_mut().edit_title("a", "After").unwrap();
    clock.set(500);
    vault.pump();

    let (flushed, backend) = vault.close();
    assert!(matches!(
        &flushed[..],
        [AutosaveOutcome::Failed { card_id, .. }] if card_id == "a"
    ));
    assert_eq!(backend.cards["a"].title, "Title a");
}
