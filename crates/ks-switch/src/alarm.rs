//! Operational alarm channel.
//!
//! Losing an audit record after a committed transition is a compliance event,
//! not a request failure. The service reports it here and still returns success.

use ks_schemas::{AuditAction, Principal};

/// Tracing target the default sink writes to. Route it to paging/alerting.
pub const ALARM_TARGET: &str = "killswitch::alarm";

pub trait AlarmSink: Send + Sync {
    fn audit_append_failed(&self, action: AuditAction, principal: &Principal, error: &str);
}

/// Emits alarms as ERROR events on [`ALARM_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlarm;

impl AlarmSink for TracingAlarm {
    fn audit_append_failed(&self, action: AuditAction, principal: &Principal, error: &str) {
        tracing::error!(
            target: ALARM_TARGET,
            action = action.as_str(),
            principal_id = %principal.id,
            error = %error,
            "AUDIT_APPEND_FAILED: transition committed without an audit record"
        );
    }
}
