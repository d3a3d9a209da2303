//! Scenario: activate then deactivate, with the status and audit trail each
//! step must produce.
//!
//! # Invariants under test
//!
//! 1. Activation returns an engaged status carrying who/when/why and the
//!    affected-systems catalog; exactly one ACTIVATED record is appended.
//! 2. `get_status` reflects the activation from the persisted state.
//! 3. Deactivation returns a disengaged status with no activation fields
//!    and an empty catalog; exactly one DEACTIVATED record is appended.
//! 4. Reasons are trimmed; a missing deactivation reason falls back to the
//!    default, an overridden default is honored.
//!
//! All tests are pure in-process; no DB or network required.

use std::sync::Arc;

use ks_schemas::AuditAction;
use ks_switch::{DEFAULT_AFFECTED_SYSTEMS, DEFAULT_DEACTIVATION_REASON};
use ks_testkit::{operator, service_with, MemoryLockStore, OPERATOR_ID, OPERATOR_LABEL};

#[tokio::test]
async fn full_cycle_updates_state_status_and_trail() {
    let store = Arc::new(MemoryLockStore::new());
    let (svc, alarm) = service_with(store.clone());

    // 1. Activate
    let st = svc
        .activate(&operator(), "  runaway auto-build loop  ")
        .await
        .unwrap();
    assert!(st.engaged);
    assert_eq!(st.reason.as_deref(), Some("runaway auto-build loop"));
    assert_eq!(st.activated_by.as_deref(), Some(OPERATOR_LABEL));
    assert!(st.activated_at.is_some());
    assert_eq!(st.affected_systems.len(), DEFAULT_AFFECTED_SYSTEMS.len());

    let persisted = store.state();
    assert!(persisted.engaged);
    assert_eq!(persisted.last_changed_by.as_deref(), Some(OPERATOR_ID));
    assert_eq!(Some(persisted.last_changed_at), st.activated_at);

    let trail = store.audits();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, AuditAction::Activated);
    assert_eq!(trail[0].reason.as_deref(), Some("runaway auto-build loop"));

    // 2. Status
    let st = svc.get_status().await.unwrap();
    assert!(st.engaged);
    assert_eq!(st.reason.as_deref(), Some("runaway auto-build loop"));
    assert_eq!(st.activated_by.as_deref(), Some(OPERATOR_LABEL));
    assert_eq!(st.activated_at, Some(persisted.last_changed_at));
    assert!(!st.affected_systems.is_empty());

    // 3. Deactivate without a reason
    let st = svc.deactivate(&operator(), None).await.unwrap();
    assert!(!st.engaged);
    assert!(st.activated_at.is_none());
    assert!(st.activated_by.is_none());
    assert!(st.reason.is_none());
    assert!(st.affected_systems.is_empty());
    assert!(!store.state().engaged);

    let trail = store.audits();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[1].action, AuditAction::Deactivated);
    assert_eq!(trail[1].reason.as_deref(), Some(DEFAULT_DEACTIVATION_REASON));

    let st = svc.get_status().await.unwrap();
    assert!(!st.engaged);
    assert!(st.affected_systems.is_empty());

    assert!(alarm.alarms().is_empty());
}

#[tokio::test]
async fn explicit_and_overridden_deactivation_reasons() {
    let store = Arc::new(MemoryLockStore::new());
    let (svc, _) = service_with(store.clone());
    let svc = svc.with_deactivation_reason("Released by on-call");

    svc.activate(&operator(), "first").await.unwrap();
    svc.deactivate(&operator(), Some("  fixed upstream ")).await.unwrap();
    svc.activate(&operator(), "second").await.unwrap();
    svc.deactivate(&operator(), Some("   ")).await.unwrap();

    let reasons: Vec<_> = store
        .audits()
        .into_iter()
        .map(|r| r.reason.unwrap_or_default())
        .collect();
    assert_eq!(
        reasons,
        vec!["first", "fixed upstream", "second", "Released by on-call"]
    );
}

#[tokio::test]
async fn details_are_recorded_verbatim() {
    let store = Arc::new(MemoryLockStore::new());
    let (svc, _) = service_with(store.clone());

    let details = serde_json::json!({ "via": "test", "ticket": "INC-42" });
    svc.activate_with_details(&operator(), "incident", Some(details.clone()))
        .await
        .unwrap();

    assert_eq!(store.audits()[0].details, Some(details));
}
