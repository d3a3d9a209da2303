//! In-process doubles for exercising the kill switch without Postgres.
//!
//! - [`MemoryLockStore`]: a [`ks_switch::LockStateStore`] with fault injection
//!   and an optional barrier that lines racers up before compare-and-set.
//! - [`RecordingAlarm`]: an [`ks_switch::AlarmSink`] that remembers what it saw.
//! - fixtures: the operator, a stranger, and a ready-built service.

mod alarm;
mod memory_store;

pub use alarm::{RecordedAlarm, RecordingAlarm};
pub use memory_store::MemoryLockStore;

use std::sync::Arc;

use ks_schemas::Principal;
use ks_switch::{AuthorizationGate, KillSwitchService};

pub const OPERATOR_ID: &str = "operator-7f3a";
pub const OPERATOR_LABEL: &str = "operator@example.com";

pub fn operator() -> Principal {
    Principal::new(OPERATOR_ID, Some(OPERATOR_LABEL.to_string()))
}

pub fn stranger() -> Principal {
    Principal::new("someone-else", Some("someone@example.com".to_string()))
}

/// Service over `store` with the fixture operator, recording alarms.
pub fn service_with(store: Arc<MemoryLockStore>) -> (KillSwitchService, Arc<RecordingAlarm>) {
    let alarm = Arc::new(RecordingAlarm::default());
    let svc = KillSwitchService::new(store, AuthorizationGate::new(OPERATOR_ID))
        .with_alarm(alarm.clone());
    (svc, alarm)
}
