//! Shared data model for the kill switch.
//!
//! Plain serde types only. Transition rules live in `ks-switch`, persistence
//! in `ks-db`, hashing in `ks-audit`.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

/// An authenticated caller, as resolved by the external identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Opaque identity-provider id. This is what authorization compares.
    pub id: String,
    /// Human label (usually an email). Informational only.
    pub label: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, label: Option<String>) -> Self {
        Self {
            id: id.into(),
            label,
        }
    }

    /// Label when known, otherwise the raw id.
    pub fn display(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

// ---------------------------------------------------------------------------
// LockState
// ---------------------------------------------------------------------------

/// The singleton lock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub engaged: bool,
    pub last_changed_at: DateTime<Utc>,
    /// Principal id of the last successful transition; `None` until the first one.
    pub last_changed_by: Option<String>,
}

impl LockState {
    /// State written at provisioning time: disengaged, never changed.
    pub fn provisioned(at: DateTime<Utc>) -> Self {
        Self {
            engaged: false,
            last_changed_at: at,
            last_changed_by: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Audit records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Activated,
    Deactivated,
    /// Produced by external heartbeat/verification processes, never by a transition.
    Verified,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Activated => "ACTIVATED",
            AuditAction::Deactivated => "DEACTIVATED",
            AuditAction::Verified => "VERIFIED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ACTIVATED" => Ok(AuditAction::Activated),
            "DEACTIVATED" => Ok(AuditAction::Deactivated),
            "VERIFIED" => Ok(AuditAction::Verified),
            other => Err(anyhow!("invalid audit action: {}", other)),
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit record before the store has assigned its id and chain hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditRecord {
    pub action: AuditAction,
    pub principal: Principal,
    pub reason: Option<String>,
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// A persisted, immutable audit record.
///
/// `id` is assigned by the store and is strictly increasing in append order;
/// use it (not `created_at`) for anything correctness-sensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub action: AuditAction,
    pub principal: Principal,
    pub reason: Option<String>,
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
    /// `hash_self` of the record with the next-lower id, `None` for the first record.
    pub hash_prev: Option<String>,
    pub hash_self: String,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Composed status returned by every status-producing operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub engaged: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub activated_by: Option<String>,
    pub reason: Option<String>,
    /// Non-empty only while engaged.
    pub affected_systems: Vec<String>,
    pub last_checked: DateTime<Utc>,
}

/// Display form of an audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecordView {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub user: String,
    pub reason: Option<String>,
    /// Compact JSON rendering of the structured details, if any.
    pub details: Option<String>,
}

impl From<&AuditRecord> for AuditRecordView {
    fn from(rec: &AuditRecord) -> Self {
        Self {
            id: rec.id,
            timestamp: rec.created_at,
            action: rec.action,
            user: rec.principal.display().to_string(),
            reason: rec.reason.clone(),
            details: rec.details.as_ref().map(|d| d.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn audit_action_round_trips_through_wire_names() {
        for a in [
            AuditAction::Activated,
            AuditAction::Deactivated,
            AuditAction::Verified,
        ] {
            assert_eq!(AuditAction::parse(a.as_str()).unwrap(), a);
            let wire = serde_json::to_value(a).unwrap();
            assert_eq!(wire, json!(a.as_str()));
        }
        assert!(AuditAction::parse("activated").is_err());
    }

    #[test]
    fn view_falls_back_to_principal_id_without_label() {
        let rec = AuditRecord {
            id: 7,
            action: AuditAction::Verified,
            principal: Principal::new("heartbeat-probe", None),
            reason: None,
            details: Some(json!({"ok": true})),
            created_at: Utc::now(),
            hash_prev: None,
            hash_self: "00".to_string(),
        };
        let view = AuditRecordView::from(&rec);
        assert_eq!(view.user, "heartbeat-probe");
        assert_eq!(view.details.as_deref(), Some(r#"{"ok":true}"#));
    }
}
