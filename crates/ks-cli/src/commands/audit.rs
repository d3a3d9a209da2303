//! Audit trail verification, export, and external VERIFIED records.

use anyhow::{bail, Result};
use chrono::Utc;
use ks_audit::VerifyResult;
use ks_schemas::{AuditAction, NewAuditRecord};
use ks_switch::LockStateStore;
use serde_json::Value;

use super::{principal_for, Context};

fn report(verdict: &VerifyResult) -> Result<()> {
    match verdict {
        VerifyResult::Valid { records } => {
            println!("chain_valid=true records={records}");
            Ok(())
        }
        VerifyResult::Broken { id, reason } => {
            println!("chain_valid=false broken_at={id}");
            bail!("AUDIT_CHAIN_BROKEN at id={id}: {reason}")
        }
    }
}

/// Offline when `file` is given; otherwise against the store.
pub async fn verify(ctx: &Context, file: Option<&str>) -> Result<()> {
    if let Some(path) = file {
        return report(&ks_audit::verify_jsonl(path)?);
    }

    let cfg = ctx.settings()?;
    let store = ctx.store(&cfg).await?;
    let chain = store.audit_chain().await?;
    report(&ks_audit::verify_chain(&chain)?)
}

pub async fn export(ctx: &Context, out: &str) -> Result<()> {
    let cfg = ctx.settings()?;
    let store = ctx.store(&cfg).await?;
    let chain = store.audit_chain().await?;
    let n = ks_audit::write_jsonl(out, &chain)?;
    println!("exported={n} path={out}");
    Ok(())
}

/// VERIFIED never touches the lock state.
pub async fn record_verified(
    ctx: &Context,
    principal_id: &str,
    label: Option<String>,
    details: Option<Value>,
) -> Result<()> {
    if principal_id.trim().is_empty() {
        bail!("--principal-id must not be blank");
    }

    let cfg = ctx.settings()?;
    let store = ctx.store(&cfg).await?;
    let rec = store
        .append_audit(&NewAuditRecord {
            action: AuditAction::Verified,
            principal: principal_for(&cfg, principal_id, label),
            reason: None,
            details,
            created_at: Utc::now(),
        })
        .await?;
    println!("audit_id={} hash_self={}", rec.id, rec.hash_self);
    Ok(())
}
