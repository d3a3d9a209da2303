//! Durable store contract.

use async_trait::async_trait;
use ks_schemas::{AuditAction, AuditRecord, LockState, NewAuditRecord};

use crate::error::StoreError;

/// Result of the audit half of a successful compare-and-set.
#[derive(Debug, Clone)]
pub enum AuditAppend {
    Recorded(AuditRecord),
    /// The state write committed but the audit insert did not.
    Failed(String),
}

#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// The persisted `engaged` matched the expectation and the new state is written.
    Applied { audit: AuditAppend },
    /// The persisted `engaged` no longer matched; nothing was written.
    Lost,
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOrder {
    /// `created_at` descending, ties broken by `id` descending. For display.
    NewestFirst,
    /// `id` descending. For "most recent X" lookups that must not trust clocks.
    SequenceDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditQuery {
    pub limit: u32,
    pub action: Option<AuditAction>,
    pub order: AuditOrder,
}

impl AuditQuery {
    /// The `limit` most recent records of any action, for display.
    pub fn recent(limit: u32) -> Self {
        Self {
            limit,
            action: None,
            order: AuditOrder::NewestFirst,
        }
    }

    /// The single most recent record of `action`, by sequence.
    pub fn latest(action: AuditAction) -> Self {
        Self {
            limit: 1,
            action: Some(action),
            order: AuditOrder::SequenceDesc,
        }
    }
}

/// Holder of the singleton [`LockState`] and the append-only audit trail.
///
/// Implementations must make [`LockStateStore::compare_and_set`] atomic
/// relative to every other writer, across processes.
#[async_trait]
pub trait LockStateStore: Send + Sync {
    async fn read_state(&self) -> Result<LockState, StoreError>;

    /// Write `next` only if the persisted `engaged` still equals
    /// `expected_engaged`, appending `audit` in the same unit of work.
    async fn compare_and_set(
        &self,
        expected_engaged: bool,
        next: &LockState,
        audit: &NewAuditRecord,
    ) -> Result<CasOutcome, StoreError>;

    /// Plain insert. Entry point for external producers (e.g. VERIFIED heartbeats).
    async fn append_audit(&self, audit: &NewAuditRecord) -> Result<AuditRecord, StoreError>;

    async fn list_recent_audits(&self, query: &AuditQuery)
        -> Result<Vec<AuditRecord>, StoreError>;

    /// Every audit record, ascending by id, for chain verification and export.
    async fn audit_chain(&self) -> Result<Vec<AuditRecord>, StoreError>;
}
