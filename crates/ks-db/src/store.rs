use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ks_schemas::{AuditAction, AuditRecord, LockState, NewAuditRecord, Principal};
use ks_switch::{AuditAppend, AuditOrder, AuditQuery, CasOutcome, LockStateStore, StoreError};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;

const AUDIT_COLUMNS: &str = "id, action, principal_id, principal_label, reason, details, \
                             created_at, hash_prev, hash_self";

/// [`LockStateStore`] over the `kill_switch_state` / `kill_switch_audit` tables.
///
/// Atomicity comes from Postgres: the compare-and-set is a single conditional
/// UPDATE on the singleton row, and that row's lock also serialises every
/// audit-chain append. Each call is bounded by `op_timeout`.
#[derive(Clone)]
pub struct PgLockStore {
    pool: PgPool,
    op_timeout: Duration,
}

impl PgLockStore {
    pub fn new(pool: PgPool, op_timeout: Duration) -> Self {
        Self { pool, op_timeout }
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }

    async fn read_state_inner(&self) -> Result<LockState, StoreError> {
        let row = sqlx::query(
            r#"
            select engaged, last_changed_at, last_changed_by
            from kill_switch_state
            where singleton
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("read kill_switch_state", e))?;

        let row = row.ok_or_else(|| {
            StoreError::Corrupt("kill_switch_state row is missing".to_string())
        })?;

        Ok(LockState {
            engaged: row
                .try_get("engaged")
                .map_err(|e| store_err("decode engaged", e))?,
            last_changed_at: row
                .try_get("last_changed_at")
                .map_err(|e| store_err("decode last_changed_at", e))?,
            last_changed_by: row
                .try_get("last_changed_by")
                .map_err(|e| store_err("decode last_changed_by", e))?,
        })
    }

    async fn compare_and_set_inner(
        &self,
        expected_engaged: bool,
        next: &LockState,
        audit: &NewAuditRecord,
    ) -> Result<CasOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_err("begin transition", e))?;

        let res = sqlx::query(
            r#"
            update kill_switch_state
            set engaged = $1,
                last_changed_at = $2,
                last_changed_by = $3
            where singleton
              and engaged = $4
            "#,
        )
        .bind(next.engaged)
        .bind(next.last_changed_at)
        .bind(&next.last_changed_by)
        .bind(expected_engaged)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_err("update kill_switch_state", e))?;

        if res.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| store_err("rollback lost transition", e))?;
            debug!(expected_engaged, "compare-and-set lost");
            return Ok(CasOutcome::Lost);
        }

        // The audit insert may fail without undoing the state change.
        sqlx::query("savepoint audit_append")
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err("savepoint", e))?;

        let appended = match insert_chained(&mut *tx, audit).await {
            Ok(rec) => {
                sqlx::query("release savepoint audit_append")
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| store_err("release savepoint", e))?;
                AuditAppend::Recorded(rec)
            }
            Err(e) => {
                sqlx::query("rollback to savepoint audit_append")
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| store_err("rollback to savepoint", e))?;
                AuditAppend::Failed(format!("{e:#}"))
            }
        };

        tx.commit()
            .await
            .map_err(|e| store_err("commit transition", e))?;

        Ok(CasOutcome::Applied { audit: appended })
    }

    async fn append_audit_inner(&self, audit: &NewAuditRecord) -> Result<AuditRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_err("begin audit append", e))?;

        // Same row lock a transition takes; keeps the chain linear.
        sqlx::query("select 1 from kill_switch_state where singleton for update")
            .execute(&mut *tx)
            .await
            .map_err(|e| store_err("lock kill_switch_state", e))?;

        let rec = insert_chained(&mut *tx, audit)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{e:#}")))?;

        tx.commit()
            .await
            .map_err(|e| store_err("commit audit append", e))?;
        Ok(rec)
    }

    async fn list_recent_audits_inner(
        &self,
        query: &AuditQuery,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let order = match query.order {
            AuditOrder::NewestFirst => "created_at desc, id desc",
            AuditOrder::SequenceDesc => "id desc",
        };
        let sql = format!(
            "select {AUDIT_COLUMNS} from kill_switch_audit \
             where ($1::text is null or action = $1) \
             order by {order} \
             limit $2"
        );

        let rows = sqlx::query(&sql)
            .bind(query.action.map(|a| a.as_str()))
            .bind(i64::from(query.limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("list kill_switch_audit", e))?;

        rows.iter().map(decode_audit).collect()
    }

    async fn audit_chain_inner(&self) -> Result<Vec<AuditRecord>, StoreError> {
        let sql = format!("select {AUDIT_COLUMNS} from kill_switch_audit order by id asc");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("read kill_switch_audit chain", e))?;

        rows.iter().map(decode_audit).collect()
    }
}

#[async_trait]
impl LockStateStore for PgLockStore {
    async fn read_state(&self) -> Result<LockState, StoreError> {
        self.bounded(self.read_state_inner()).await
    }

    async fn compare_and_set(
        &self,
        expected_engaged: bool,
        next: &LockState,
        audit: &NewAuditRecord,
    ) -> Result<CasOutcome, StoreError> {
        self.bounded(self.compare_and_set_inner(expected_engaged, next, audit))
            .await
    }

    async fn append_audit(&self, audit: &NewAuditRecord) -> Result<AuditRecord, StoreError> {
        self.bounded(self.append_audit_inner(audit)).await
    }

    async fn list_recent_audits(
        &self,
        query: &AuditQuery,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        self.bounded(self.list_recent_audits_inner(query)).await
    }

    async fn audit_chain(&self) -> Result<Vec<AuditRecord>, StoreError> {
        self.bounded(self.audit_chain_inner()).await
    }
}

/// Seal `new` onto the current chain head and insert it.
///
/// Caller must hold the `kill_switch_state` row lock.
async fn insert_chained(
    conn: &mut PgConnection,
    new: &NewAuditRecord,
) -> anyhow::Result<AuditRecord> {
    let hash_prev = sqlx::query_scalar::<_, String>(
        "select hash_self from kill_switch_audit order by id desc limit 1",
    )
    .fetch_optional(&mut *conn)
    .await
    .context("read audit chain head")?;

    let (id,): (i64,) = sqlx::query_as::<_, (i64,)>(
        "select nextval(pg_get_serial_sequence('kill_switch_audit', 'id'))",
    )
    .fetch_one(&mut *conn)
    .await
    .context("allocate audit id")?;

    let rec = ks_audit::seal(id, new, hash_prev)?;

    sqlx::query(
        r#"
        insert into kill_switch_audit (
          id, action, principal_id, principal_label, reason, details,
          created_at, hash_prev, hash_self
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9
        )
        "#,
    )
    .bind(rec.id)
    .bind(rec.action.as_str())
    .bind(&rec.principal.id)
    .bind(&rec.principal.label)
    .bind(&rec.reason)
    .bind(&rec.details)
    .bind(rec.created_at)
    .bind(&rec.hash_prev)
    .bind(&rec.hash_self)
    .execute(&mut *conn)
    .await
    .context("insert kill_switch_audit failed")?;

    Ok(rec)
}

fn decode_audit(row: &PgRow) -> Result<AuditRecord, StoreError> {
    let action: String = row
        .try_get("action")
        .map_err(|e| store_err("decode action", e))?;
    let action =
        AuditAction::parse(&action).map_err(|e| StoreError::Corrupt(format!("{e:#}")))?;

    let principal_id: String = row
        .try_get("principal_id")
        .map_err(|e| store_err("decode principal_id", e))?;
    let principal_label: Option<String> = row
        .try_get("principal_label")
        .map_err(|e| store_err("decode principal_label", e))?;
    let details: Option<Value> = row
        .try_get("details")
        .map_err(|e| store_err("decode details", e))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| store_err("decode created_at", e))?;

    Ok(AuditRecord {
        id: row.try_get("id").map_err(|e| store_err("decode id", e))?,
        action,
        principal: Principal::new(principal_id, principal_label),
        reason: row
            .try_get("reason")
            .map_err(|e| store_err("decode reason", e))?,
        details,
        created_at,
        hash_prev: row
            .try_get("hash_prev")
            .map_err(|e| store_err("decode hash_prev", e))?,
        hash_self: row
            .try_get("hash_self")
            .map_err(|e| store_err("decode hash_self", e))?,
    })
}

/// Classify a driver error. Decoding problems mean the data is wrong, not the
/// connection.
fn store_err(what: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound
        | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupt(format!("{what}: {err}")),
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("{what}: connection pool timed out"))
        }
        other => StoreError::Unavailable(format!("{what}: {other}")),
    }
}
