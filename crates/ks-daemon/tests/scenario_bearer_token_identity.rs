//! Scenario: bearer-token identity mode.
//!
//! # Invariants under test
//!
//! 1. The operator's token authenticates and authorizes.
//! 2. A valid token bound to another principal is denied like an unknown one.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use ks_config::ResolvedToken;
use ks_daemon::{auth::BearerTokenResolver, routes, state};
use ks_testkit::{service_with, MemoryLockStore, OPERATOR_ID};
use tower::ServiceExt;

fn status_req(token: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri("/v1/kill-switch/status")
        .header("authorization", format!("Bearer {token}"))
        .body(axum::body::Body::empty())
        .unwrap()
}

#[tokio::test]
async fn only_the_operator_token_is_accepted() {
    let (svc, _) = service_with(Arc::new(MemoryLockStore::new()));
    let identity = BearerTokenResolver::new(&[
        ResolvedToken {
            principal_id: OPERATOR_ID.to_string(),
            label: None,
            token: "operator-token".to_string(),
        },
        ResolvedToken {
            principal_id: "auditor".to_string(),
            label: None,
            token: "auditor-token".to_string(),
        },
    ]);
    let st = Arc::new(state::AppState::new(svc, Arc::new(identity)));

    let resp = routes::build_router(Arc::clone(&st))
        .oneshot(status_req("operator-token"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    for token in ["auditor-token", "unknown-token"] {
        let resp = routes::build_router(Arc::clone(&st))
            .oneshot(status_req(token))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{token}");
    }
}
