//! Scenario: a committed transition whose audit insert fails.
//!
//! # Invariants under test
//!
//! 1. The transition still succeeds and the state change is durable.
//! 2. The alarm sink receives exactly one AUDIT_APPEND_FAILED event naming
//!    the action and principal.
//! 3. Status afterwards does not attribute the new activation to an older
//!    ACTIVATED record; the activation detail is simply absent.
//!
//! All tests are pure in-process; no DB or network required.

use std::sync::Arc;

use ks_schemas::AuditAction;
use ks_testkit::{operator, service_with, MemoryLockStore, OPERATOR_ID};

#[tokio::test]
async fn unaudited_transition_succeeds_and_alarms() {
    let store = Arc::new(MemoryLockStore::new());
    let (svc, alarm) = service_with(store.clone());

    store.set_fail_audit_appends(true);
    let st = svc.activate(&operator(), "incident").await.unwrap();
    assert!(st.engaged);
    assert!(store.state().engaged);
    assert!(store.audits().is_empty());

    let alarms = alarm.alarms();
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].action, AuditAction::Activated);
    assert_eq!(alarms[0].principal_id, OPERATOR_ID);
}

#[tokio::test]
async fn stale_activation_record_not_reused_for_status() {
    let store = Arc::new(MemoryLockStore::new());
    let (svc, alarm) = service_with(store.clone());

    // Audited cycle.
    svc.activate(&operator(), "old incident").await.unwrap();
    svc.deactivate(&operator(), None).await.unwrap();

    // Unaudited re-activation.
    store.set_fail_audit_appends(true);
    svc.activate(&operator(), "new incident").await.unwrap();
    store.set_fail_audit_appends(false);
    assert_eq!(alarm.alarms().len(), 1);

    let st = svc.get_status().await.unwrap();
    assert!(st.engaged);
    assert!(st.reason.is_none());
    assert!(st.activated_at.is_none());
    assert!(st.activated_by.is_none());
    assert!(!st.affected_systems.is_empty());
}
