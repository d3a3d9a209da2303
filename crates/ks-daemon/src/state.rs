//! Shared runtime state for ks-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The kill switch state
//! itself is never cached here: every request goes to the service, which
//! goes to the store.

use std::sync::Arc;
use std::time::Duration;

use ks_schemas::{AuditAction, Principal, StatusView};
use ks_switch::{AlarmSink, KillSwitchService, TracingAlarm};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::auth::IdentityResolver;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusView),
    LogLine { level: String, msg: String },
}

pub fn new_bus() -> broadcast::Sender<BusMsg> {
    let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
    bus
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub service: Arc<KillSwitchService>,
    pub identity: Arc<dyn IdentityResolver>,
}

impl AppState {
    pub fn new(service: KillSwitchService, identity: Arc<dyn IdentityResolver>) -> Self {
        Self::with_bus(new_bus(), service, identity)
    }

    /// Use when the service's alarm sink must publish on the same bus.
    pub fn with_bus(
        bus: broadcast::Sender<BusMsg>,
        service: KillSwitchService,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            bus,
            build: BuildInfo {
                service: "ks-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            service: Arc::new(service),
            identity,
        }
    }
}

// ---------------------------------------------------------------------------
// Alarm sink
// ---------------------------------------------------------------------------

/// Traces the alarm like [`TracingAlarm`] and also pushes an ERROR log line
/// to SSE subscribers.
#[derive(Clone)]
pub struct BusAlarm {
    bus: broadcast::Sender<BusMsg>,
}

impl BusAlarm {
    pub fn new(bus: broadcast::Sender<BusMsg>) -> Self {
        Self { bus }
    }
}

impl AlarmSink for BusAlarm {
    fn audit_append_failed(&self, action: AuditAction, principal: &Principal, error: &str) {
        TracingAlarm.audit_append_failed(action, principal, error);
        let _ = self.bus.send(BusMsg::LogLine {
            level: "ERROR".to_string(),
            msg: format!(
                "AUDIT_APPEND_FAILED: {action} by {} committed without an audit record",
                principal.id
            ),
        });
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
