//! KillSwitchService: the activate / deactivate / status / logs protocol.
//!
//! Transition order for both directions:
//!
//! 1. authorization gate (`Forbidden`)
//! 2. argument check, activation only (`InvalidArgument`)
//! 3. read current state, refuse wrong-phase requests (`Conflict`)
//! 4. compare-and-set on the store, expected = the phase read in 3;
//!    a lost race re-reads and surfaces `Conflict`, never retries
//!
//! A committed transition whose audit insert failed still succeeds; the
//! failure goes to the [`AlarmSink`].
//!
//! Text reaching the audit trail never carries NUL characters (Postgres
//! `text`/`jsonb` reject them): an activation reason with NUL is refused,
//! everywhere else they are stripped.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use ks_audit::VerifyResult;
use ks_schemas::{
    AuditAction, AuditRecord, AuditRecordView, LockState, NewAuditRecord, Principal, StatusView,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::alarm::{AlarmSink, TracingAlarm};
use crate::catalog::AffectedSystems;
use crate::error::{KillSwitchError, StoreError};
use crate::gate::AuthorizationGate;
use crate::lock::{self, LockPhase, Transition};
use crate::store::{AuditAppend, AuditQuery, CasOutcome, LockStateStore};

/// Reason recorded when a deactivation arrives without one.
pub const DEFAULT_DEACTIVATION_REASON: &str = "Manual deactivation by operator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for LogLimits {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 500,
        }
    }
}

impl LogLimits {
    /// Absent means default; anything else is clamped to `[1, max_limit]`.
    pub fn resolve(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

/// Who/when/why of the activation currently in force.
struct Activation {
    at: DateTime<Utc>,
    by: Option<String>,
    reason: Option<String>,
}

pub struct KillSwitchService {
    store: Arc<dyn LockStateStore>,
    gate: AuthorizationGate,
    catalog: AffectedSystems,
    alarm: Arc<dyn AlarmSink>,
    deactivation_reason: String,
    log_limits: LogLimits,
}

impl KillSwitchService {
    pub fn new(store: Arc<dyn LockStateStore>, gate: AuthorizationGate) -> Self {
        Self {
            store,
            gate,
            catalog: AffectedSystems::default(),
            alarm: Arc::new(TracingAlarm),
            deactivation_reason: DEFAULT_DEACTIVATION_REASON.to_string(),
            log_limits: LogLimits::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: AffectedSystems) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_alarm(mut self, alarm: Arc<dyn AlarmSink>) -> Self {
        self.alarm = alarm;
        self
    }

    pub fn with_deactivation_reason(mut self, reason: impl Into<String>) -> Self {
        let reason = strip_nul(&reason.into());
        if !reason.trim().is_empty() {
            self.deactivation_reason = reason.trim().to_string();
        }
        self
    }

    pub fn with_log_limits(mut self, limits: LogLimits) -> Self {
        self.log_limits = limits;
        self
    }

    pub fn gate(&self) -> &AuthorizationGate {
        &self.gate
    }

    // -----------------------------------------------------------------------
    // Authorization
    // -----------------------------------------------------------------------

    /// `Ok(())` for the operator, `Forbidden` for anyone else.
    pub fn authorize(&self, principal: &Principal) -> Result<(), KillSwitchError> {
        if self.gate.authorize(principal).allowed {
            Ok(())
        } else {
            warn!(principal_id = %principal.id, "kill switch access refused: not the operator");
            Err(KillSwitchError::Forbidden)
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    pub async fn activate(
        &self,
        principal: &Principal,
        reason: &str,
    ) -> Result<StatusView, KillSwitchError> {
        self.activate_with_details(principal, reason, None).await
    }

    /// Engage the switch. `reason` is mandatory (trimmed, non-empty).
    pub async fn activate_with_details(
        &self,
        principal: &Principal,
        reason: &str,
        details: Option<Value>,
    ) -> Result<StatusView, KillSwitchError> {
        self.authorize(principal)?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(KillSwitchError::InvalidArgument(
                "reason is required".to_string(),
            ));
        }
        if reason.contains('\0') {
            return Err(KillSwitchError::InvalidArgument(
                "reason must not contain NUL characters".to_string(),
            ));
        }

        self.transition(Transition::Activate, principal, reason.to_string(), details)
            .await
    }

    pub async fn deactivate(
        &self,
        principal: &Principal,
        reason: Option<&str>,
    ) -> Result<StatusView, KillSwitchError> {
        self.deactivate_with_details(principal, reason, None).await
    }

    /// Disengage the switch. A missing or blank reason falls back to the
    /// configured default; deactivation never fails for lack of one.
    pub async fn deactivate_with_details(
        &self,
        principal: &Principal,
        reason: Option<&str>,
        details: Option<Value>,
    ) -> Result<StatusView, KillSwitchError> {
        self.authorize(principal)?;

        let reason = reason
            .map(strip_nul)
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.deactivation_reason.clone());

        self.transition(Transition::Deactivate, principal, reason, details)
            .await
    }

    async fn transition(
        &self,
        transition: Transition,
        principal: &Principal,
        reason: String,
        details: Option<Value>,
    ) -> Result<StatusView, KillSwitchError> {
        let principal = &recordable(principal);
        let details = details.map(scrub_nul);

        let current = self.store.read_state().await?;
        if let Err(refused) = lock::evaluate(LockPhase::of(&current), transition) {
            info!(
                transition = transition.as_str(),
                principal_id = %principal.id,
                current = ?refused.current,
                "kill switch transition refused: wrong phase"
            );
            return Err(KillSwitchError::Conflict(
                transition.conflict_message().to_string(),
            ));
        }

        let now = Utc::now().trunc_subsecs(6);
        let next = LockState {
            engaged: transition.to_phase().is_engaged(),
            last_changed_at: now,
            last_changed_by: Some(principal.id.clone()),
        };
        let audit = NewAuditRecord {
            action: transition.audit_action(),
            principal: principal.clone(),
            reason: Some(reason.clone()),
            details,
            created_at: now,
        };

        let expected = transition.from_phase().is_engaged();
        match self.store.compare_and_set(expected, &next, &audit).await? {
            CasOutcome::Lost => Err(self.lost_race(transition, principal).await),
            CasOutcome::Applied { audit: appended } => {
                match &appended {
                    AuditAppend::Recorded(rec) => info!(
                        transition = transition.as_str(),
                        principal_id = %principal.id,
                        audit_id = rec.id,
                        "kill switch transition applied"
                    ),
                    AuditAppend::Failed(err) => {
                        self.alarm
                            .audit_append_failed(audit.action, principal, err)
                    }
                }

                let activation = next.engaged.then(|| Activation {
                    at: now,
                    by: Some(principal.display().to_string()),
                    reason: Some(reason),
                });
                Ok(self.compose(&next, activation))
            }
        }
    }

    /// Build the Conflict for a lost compare-and-set from a fresh read.
    async fn lost_race(&self, transition: Transition, principal: &Principal) -> KillSwitchError {
        let message = match self.store.read_state().await {
            Ok(now) if LockPhase::of(&now) == transition.to_phase() => {
                transition.conflict_message().to_string()
            }
            Ok(_) => "kill switch state changed concurrently".to_string(),
            Err(e) => {
                warn!(error = %e, "re-read after lost compare-and-set failed");
                "kill switch state changed concurrently".to_string()
            }
        };
        warn!(
            transition = transition.as_str(),
            principal_id = %principal.id,
            "kill switch compare-and-set lost to a concurrent writer"
        );
        KillSwitchError::Conflict(message)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn get_status(&self) -> Result<StatusView, KillSwitchError> {
        let state = self.store.read_state().await?;
        if !state.engaged {
            return Ok(self.compose(&state, None));
        }

        let latest = match self
            .store
            .list_recent_audits(&AuditQuery::latest(AuditAction::Activated))
            .await
        {
            Ok(recs) => recs.into_iter().next(),
            Err(e) => {
                warn!(error = %e, "activation detail lookup failed; status degraded");
                None
            }
        };

        let activation = latest.and_then(|rec| activation_for(&state, rec));
        Ok(self.compose(&state, activation))
    }

    /// The most recent audit records, newest first.
    pub async fn get_logs(&self, limit: Option<u32>) -> Result<Vec<AuditRecordView>, KillSwitchError> {
        let query = AuditQuery::recent(self.log_limits.resolve(limit));
        let records = self.store.list_recent_audits(&query).await?;
        Ok(records.iter().map(AuditRecordView::from).collect())
    }

    /// Re-verify the whole audit hash chain as persisted.
    pub async fn verify_audit_chain(&self) -> Result<VerifyResult, KillSwitchError> {
        let chain = self.store.audit_chain().await?;
        ks_audit::verify_chain(&chain)
            .map_err(|e| StoreError::Corrupt(format!("{e:#}")).into())
    }

    fn compose(&self, state: &LockState, activation: Option<Activation>) -> StatusView {
        let (activated_at, activated_by, reason) = match activation {
            Some(a) if state.engaged => (Some(a.at), a.by, a.reason),
            _ => (None, None, None),
        };
        StatusView {
            engaged: state.engaged,
            activated_at,
            activated_by,
            reason,
            affected_systems: self.catalog.for_engaged(state.engaged),
            last_checked: Utc::now(),
        }
    }
}

/// Pair the engaged state with its ACTIVATED record.
///
/// A record only describes the current activation if it was written by the
/// same transition as the state row (same timestamp and principal). A stale
/// record (its successor's audit append failed) yields no activation detail.
fn activation_for(state: &LockState, rec: AuditRecord) -> Option<Activation> {
    let same_transition = rec.created_at == state.last_changed_at
        && state.last_changed_by.as_deref() == Some(rec.principal.id.as_str());
    same_transition.then(|| Activation {
        at: rec.created_at,
        by: Some(rec.principal.display().to_string()),
        reason: rec.reason,
    })
}

fn strip_nul(s: &str) -> String {
    s.replace('\0', "")
}

/// The caller as it will be written to the trail. The id is left alone: it
/// already matched the operator id exactly.
fn recordable(principal: &Principal) -> Principal {
    let label = principal
        .label
        .as_deref()
        .map(strip_nul)
        .filter(|l| !l.trim().is_empty());
    Principal::new(principal.id.clone(), label)
}

/// Drop NUL from every string and key in a details payload.
fn scrub_nul(v: Value) -> Value {
    match v {
        Value::String(s) => Value::String(strip_nul(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(scrub_nul).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (strip_nul(&k), scrub_nul(v)))
                .collect(),
        ),
        other => other,
    }
}
