use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use ks_schemas::{AuditRecord, LockState, NewAuditRecord};
use ks_switch::{AuditAppend, AuditOrder, AuditQuery, CasOutcome, LockStateStore, StoreError};
use tokio::sync::Barrier;

struct Inner {
    state: LockState,
    audits: Vec<AuditRecord>,
    next_id: i64,
}

impl Inner {
    fn append(&mut self, new: &NewAuditRecord) -> Result<AuditRecord, String> {
        let hash_prev = self.audits.last().map(|r| r.hash_self.clone());
        let rec = ks_audit::seal(self.next_id, new, hash_prev).map_err(|e| format!("{e:#}"))?;
        self.next_id += 1;
        self.audits.push(rec.clone());
        Ok(rec)
    }
}

/// Mutex-backed store. The mutex makes compare-and-set atomic within the process.
pub struct MemoryLockStore {
    inner: Mutex<Inner>,
    fail_reads: AtomicBool,
    fail_audit_reads: AtomicBool,
    fail_audit_appends: AtomicBool,
    lose_next_cas: AtomicBool,
    cas_barrier: Option<Arc<Barrier>>,
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockStore {
    /// Provisioned: disengaged, empty trail.
    pub fn new() -> Self {
        Self::with_state(LockState::provisioned(Utc::now()))
    }

    pub fn with_state(state: LockState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                audits: Vec::new(),
                next_id: 1,
            }),
            fail_reads: AtomicBool::new(false),
            fail_audit_reads: AtomicBool::new(false),
            fail_audit_appends: AtomicBool::new(false),
            lose_next_cas: AtomicBool::new(false),
            cas_barrier: None,
        }
    }

    /// Every compare-and-set waits until `parties` callers have arrived.
    pub fn with_cas_barrier(mut self, parties: usize) -> Self {
        self.cas_barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    /// `read_state` fails with `Unavailable`.
    pub fn set_fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    /// `list_recent_audits` and `audit_chain` fail with `Unavailable`.
    pub fn set_fail_audit_reads(&self, on: bool) {
        self.fail_audit_reads.store(on, Ordering::SeqCst);
    }

    /// Audit inserts fail; state writes still commit.
    pub fn set_fail_audit_appends(&self, on: bool) {
        self.fail_audit_appends.store(on, Ordering::SeqCst);
    }

    /// The next compare-and-set behaves as if another writer flipped the
    /// state first: the flip is applied (unaudited) and the caller loses.
    pub fn lose_next_cas(&self) {
        self.lose_next_cas.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> LockState {
        self.lock().state.clone()
    }

    pub fn audits(&self) -> Vec<AuditRecord> {
        self.lock().audits.clone()
    }

    /// Rewrite a stored record's reason in place, leaving its hashes alone.
    pub fn tamper_reason(&self, id: i64, reason: &str) -> bool {
        let mut inner = self.lock();
        match inner.audits.iter_mut().find(|r| r.id == id) {
            Some(rec) => {
                rec.reason = Some(reason.to_string());
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }

    fn check_audit_reads(&self) -> Result<(), StoreError> {
        if self.fail_audit_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "injected audit read failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LockStateStore for MemoryLockStore {
    async fn read_state(&self) -> Result<LockState, StoreError> {
        self.check_reads()?;
        Ok(self.state())
    }

    async fn compare_and_set(
        &self,
        expected_engaged: bool,
        next: &LockState,
        audit: &NewAuditRecord,
    ) -> Result<CasOutcome, StoreError> {
        if let Some(barrier) = &self.cas_barrier {
            barrier.wait().await;
        }

        let mut inner = self.lock();

        if self.lose_next_cas.swap(false, Ordering::SeqCst) {
            inner.state.engaged = !expected_engaged;
        }
        if inner.state.engaged != expected_engaged {
            return Ok(CasOutcome::Lost);
        }

        inner.state = next.clone();

        let appended = if self.fail_audit_appends.load(Ordering::SeqCst) {
            AuditAppend::Failed("injected audit append failure".to_string())
        } else {
            match inner.append(audit) {
                Ok(rec) => AuditAppend::Recorded(rec),
                Err(e) => AuditAppend::Failed(e),
            }
        };

        Ok(CasOutcome::Applied { audit: appended })
    }

    async fn append_audit(&self, audit: &NewAuditRecord) -> Result<AuditRecord, StoreError> {
        if self.fail_audit_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "injected audit append failure".to_string(),
            ));
        }
        self.lock().append(audit).map_err(StoreError::Unavailable)
    }

    async fn list_recent_audits(
        &self,
        query: &AuditQuery,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        self.check_audit_reads()?;

        let mut out: Vec<AuditRecord> = self
            .lock()
            .audits
            .iter()
            .filter(|r| query.action.map_or(true, |a| r.action == a))
            .cloned()
            .collect();

        match query.order {
            AuditOrder::NewestFirst => {
                out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
            }
            AuditOrder::SequenceDesc => out.sort_by(|a, b| b.id.cmp(&a.id)),
        }
        out.truncate(query.limit as usize);
        Ok(out)
    }

    async fn audit_chain(&self) -> Result<Vec<AuditRecord>, StoreError> {
        self.check_audit_reads()?;
        Ok(self.audits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ks_schemas::{AuditAction, Principal};

    fn activation(reason: &str) -> (LockState, NewAuditRecord) {
        let now = Utc::now();
        let p = Principal::new("op", None);
        (
            LockState {
                engaged: true,
                last_changed_at: now,
                last_changed_by: Some(p.id.clone()),
            },
            NewAuditRecord {
                action: AuditAction::Activated,
                principal: p,
                reason: Some(reason.to_string()),
                details: None,
                created_at: now,
            },
        )
    }

    #[tokio::test]
    async fn stale_expectation_loses_without_writing() {
        let store = MemoryLockStore::new();
        let (next, audit) = activation("incident");

        assert!(store.compare_and_set(false, &next, &audit).await.unwrap().is_applied());
        let second = store.compare_and_set(false, &next, &audit).await.unwrap();
        assert!(matches!(second, CasOutcome::Lost));
        assert_eq!(store.audits().len(), 1);
    }

    #[tokio::test]
    async fn failed_audit_append_still_commits_state() {
        let store = MemoryLockStore::new();
        store.set_fail_audit_appends(true);
        let (next, audit) = activation("incident");

        match store.compare_and_set(false, &next, &audit).await.unwrap() {
            CasOutcome::Applied {
                audit: AuditAppend::Failed(_),
            } => {}
            other => panic!("expected applied with failed audit, got {other:?}"),
        }
        assert!(store.state().engaged);
        assert!(store.audits().is_empty());
    }
}
