//! ks-switch
//!
//! The kill switch core: who may flip it, how a flip is decided, and how the
//! result is composed for callers.
//!
//! - [`AuthorizationGate`]: pure principal-vs-operator check.
//! - [`lock`]: the two-state machine (DISENGAGED / ENGAGED).
//! - [`LockStateStore`]: durable truth, with an atomic compare-and-set.
//! - [`KillSwitchService`]: orchestrates activate / deactivate / status / logs.
//!
//! Correctness under concurrency lives in the store's compare-and-set; this
//! crate holds no in-memory lock state of its own.

mod alarm;
mod catalog;
mod error;
mod gate;
pub mod lock;
mod service;
mod store;

pub use alarm::{AlarmSink, TracingAlarm, ALARM_TARGET};
pub use catalog::{AffectedSystems, DEFAULT_AFFECTED_SYSTEMS};
pub use error::{KillSwitchError, StoreError};
pub use gate::{Authorization, AuthorizationGate};
pub use service::{KillSwitchService, LogLimits, DEFAULT_DEACTIVATION_REASON};
pub use store::{AuditAppend, AuditOrder, AuditQuery, CasOutcome, LockStateStore};
