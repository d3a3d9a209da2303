//! Axum router and all HTTP handlers for ks-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  Every kill switch route resolves identity and checks
//! authorization before looking at the request body or query.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use ks_audit::VerifyResult;
use ks_schemas::Principal;
use ks_switch::KillSwitchError;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api_types::{
        ActivateRequest, DeactivateRequest, ErrorResponse, HealthResponse, LogsQuery,
        LogsResponse, VerifyResponse,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// CORS and tracing layers are attached by `main.rs`; tests drive the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/kill-switch/status", get(status_handler))
        .route("/v1/kill-switch/activate", post(activate))
        .route("/v1/kill-switch/deactivate", post(deactivate))
        .route("/v1/kill-switch/logs", get(logs))
        .route("/v1/kill-switch/audit/verify", get(audit_verify))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Map a domain error to its HTTP response.
///
/// Unauthenticated and Forbidden share one body so callers cannot probe
/// which principals exist.
pub(crate) fn error_response(err: KillSwitchError) -> Response {
    let (status, body) = match &err {
        KillSwitchError::Unauthenticated | KillSwitchError::Forbidden => (
            StatusCode::FORBIDDEN,
            ErrorResponse {
                error: "ACCESS_DENIED".to_string(),
                message: None,
            },
        ),
        KillSwitchError::InvalidArgument(msg) => (
            StatusCode::BAD_REQUEST,
            ErrorResponse {
                error: err.code().to_string(),
                message: Some(msg.clone()),
            },
        ),
        KillSwitchError::Conflict(msg) => (
            StatusCode::CONFLICT,
            ErrorResponse {
                error: err.code().to_string(),
                message: Some(msg.clone()),
            },
        ),
        KillSwitchError::Unavailable(cause) => {
            warn!(error = %cause, "kill switch store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: err.code().to_string(),
                    message: Some("kill switch state is temporarily unavailable".to_string()),
                },
            )
        }
    };
    (status, Json(body)).into_response()
}

/// Resolve the caller and require that it is the operator.
fn require_operator(st: &AppState, headers: &HeaderMap) -> Result<Principal, Response> {
    let principal = st.identity.resolve(headers).map_err(|e| {
        warn!("kill switch request without a valid identity");
        error_response(e)
    })?;
    st.service.authorize(&principal).map_err(error_response)?;
    Ok(principal)
}

fn transport_details() -> Value {
    json!({
        "request_id": Uuid::new_v4().to_string(),
        "via": "http",
    })
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/kill-switch/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = require_operator(&st, &headers) {
        return denied;
    }

    match st.service.get_status().await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/kill-switch/activate
// ---------------------------------------------------------------------------

/// A missing or unparseable body is treated as "no reason" and rejected by
/// the service after authorization.
pub(crate) async fn activate(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<ActivateRequest>>,
) -> Response {
    let principal = match require_operator(&st, &headers) {
        Ok(p) => p,
        Err(denied) => return denied,
    };

    let reason = body.and_then(|Json(b)| b.reason).unwrap_or_default();
    match st
        .service
        .activate_with_details(&principal, &reason, Some(transport_details()))
        .await
    {
        Ok(view) => {
            info!(principal_id = %principal.id, "kill-switch/activate");
            let _ = st.bus.send(BusMsg::LogLine {
                level: "WARN".to_string(),
                msg: format!("kill switch ACTIVATED by {}", principal.display()),
            });
            let _ = st.bus.send(BusMsg::Status(view.clone()));
            (StatusCode::OK, Json(view)).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/kill-switch/deactivate
// ---------------------------------------------------------------------------

/// The body is optional; without a reason the configured default is recorded.
pub(crate) async fn deactivate(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<DeactivateRequest>>,
) -> Response {
    let principal = match require_operator(&st, &headers) {
        Ok(p) => p,
        Err(denied) => return denied,
    };

    let reason = body.and_then(|Json(b)| b.reason);
    match st
        .service
        .deactivate_with_details(&principal, reason.as_deref(), Some(transport_details()))
        .await
    {
        Ok(view) => {
            info!(principal_id = %principal.id, "kill-switch/deactivate");
            let _ = st.bus.send(BusMsg::LogLine {
                level: "INFO".to_string(),
                msg: format!("kill switch deactivated by {}", principal.display()),
            });
            let _ = st.bus.send(BusMsg::Status(view.clone()));
            (StatusCode::OK, Json(view)).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/kill-switch/logs?limit=N
// ---------------------------------------------------------------------------

pub(crate) async fn logs(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Response {
    if let Err(denied) = require_operator(&st, &headers) {
        return denied;
    }

    let limit = match query {
        Ok(Query(q)) => q.limit,
        Err(rejection) => {
            return error_response(KillSwitchError::InvalidArgument(format!(
                "invalid query: {}",
                rejection.body_text()
            )))
        }
    };

    match st.service.get_logs(limit).await {
        Ok(logs) => {
            let total = logs.len();
            (StatusCode::OK, Json(LogsResponse { logs, total })).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/kill-switch/audit/verify
// ---------------------------------------------------------------------------

pub(crate) async fn audit_verify(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = require_operator(&st, &headers) {
        return denied;
    }

    match st.service.verify_audit_chain().await {
        Ok(verdict) => {
            let body = match verdict {
                VerifyResult::Valid { records } => VerifyResponse {
                    valid: true,
                    records: Some(records),
                    broken_at: None,
                    reason: None,
                },
                VerifyResult::Broken { id, reason } => {
                    warn!(audit_id = id, %reason, "audit chain verification failed");
                    VerifyResponse {
                        valid: false,
                        records: None,
                        broken_at: Some(id),
                        reason: Some(reason),
                    }
                }
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_operator(&st, &headers) {
        return denied;
    }

    let mut out = HeaderMap::new();
    out.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    out.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (out, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Status(_) => "status",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
