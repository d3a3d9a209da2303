//! Scenario: the persisted audit trail forms a verifiable hash chain.
//!
//! # Invariants under test
//!
//! 1. A trail built by normal transitions verifies.
//! 2. Rewriting a stored record is detected at that record's id.
//!
//! All tests are pure in-process; no DB or network required.

use std::sync::Arc;

use ks_audit::VerifyResult;
use ks_testkit::{operator, service_with, MemoryLockStore};

#[tokio::test]
async fn chain_verifies_then_detects_tamper() {
    let store = Arc::new(MemoryLockStore::new());
    let (svc, _) = service_with(store.clone());

    svc.activate(&operator(), "one").await.unwrap();
    svc.deactivate(&operator(), None).await.unwrap();
    svc.activate(&operator(), "three").await.unwrap();

    match svc.verify_audit_chain().await.unwrap() {
        VerifyResult::Valid { records } => assert_eq!(records, 3),
        other => panic!("expected valid chain, got {other:?}"),
    }

    let target = store.audits()[1].id;
    assert!(store.tamper_reason(target, "nothing to see here"));

    match svc.verify_audit_chain().await.unwrap() {
        VerifyResult::Broken { id, .. } => assert_eq!(id, target),
        other => panic!("expected broken chain, got {other:?}"),
    }
}
