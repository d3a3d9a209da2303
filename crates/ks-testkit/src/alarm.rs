use std::sync::Mutex;

use ks_schemas::{AuditAction, Principal};
use ks_switch::AlarmSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAlarm {
    pub action: AuditAction,
    pub principal_id: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct RecordingAlarm {
    seen: Mutex<Vec<RecordedAlarm>>,
}

impl RecordingAlarm {
    pub fn alarms(&self) -> Vec<RecordedAlarm> {
        match self.seen.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AlarmSink for RecordingAlarm {
    fn audit_append_failed(&self, action: AuditAction, principal: &Principal, error: &str) {
        let mut seen = match self.seen.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        seen.push(RecordedAlarm {
            action,
            principal_id: principal.id.clone(),
            error: error.to_string(),
        });
    }
}
