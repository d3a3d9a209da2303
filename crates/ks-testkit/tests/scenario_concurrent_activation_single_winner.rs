//! Scenario: concurrent activations from DISENGAGED have exactly one winner.
//!
//! # Invariants under test
//!
//! 1. N operator requests that all observe DISENGAGED race into the store;
//!    exactly one succeeds and N-1 get `Conflict`.
//! 2. Exactly one ACTIVATED record exists afterwards.
//! 3. A compare-and-set lost to an outside writer surfaces as `Conflict`
//!    and is not retried.
//!
//! All tests are pure in-process; no DB or network required.

use std::sync::Arc;

use ks_schemas::AuditAction;
use ks_switch::KillSwitchError;
use ks_testkit::{operator, service_with, MemoryLockStore};

const RACERS: usize = 6;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_activations_produce_one_winner() {
    let store = Arc::new(MemoryLockStore::new().with_cas_barrier(RACERS));
    let (svc, _) = service_with(store.clone());
    let svc = Arc::new(svc);

    let mut handles = Vec::new();
    for i in 0..RACERS {
        let svc = Arc::clone(&svc);
        handles.push(tokio::spawn(async move {
            svc.activate(&operator(), &format!("racer {i}")).await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(st) => {
                assert!(st.engaged);
                wins += 1;
            }
            Err(KillSwitchError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(conflicts, RACERS - 1);
    assert!(store.state().engaged);

    let activations = store
        .audits()
        .into_iter()
        .filter(|r| r.action == AuditAction::Activated)
        .count();
    assert_eq!(activations, 1);
}

#[tokio::test]
async fn lost_compare_and_set_is_conflict_without_retry() {
    let store = Arc::new(MemoryLockStore::new());
    let (svc, _) = service_with(store.clone());

    store.lose_next_cas();
    let err = svc.activate(&operator(), "incident").await.unwrap_err();
    match err {
        KillSwitchError::Conflict(msg) => assert_eq!(msg, "kill switch is already active"),
        other => panic!("expected Conflict, got {other:?}"),
    }

    // The outside writer's flip stands; this caller appended nothing.
    assert!(store.state().engaged);
    assert!(store.audits().is_empty());
}
