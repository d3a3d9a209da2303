//! Audit record sealing and hash-chain verification.
//!
//! Every persisted kill-switch audit record carries `hash_prev` (the previous
//! record's `hash_self`) and `hash_self` (SHA-256 of the record's canonical
//! JSON without `hash_self`). Stores call [`seal`] while holding whatever lock
//! serialises their appends; operators call [`verify_chain`] or
//! [`verify_jsonl`] to reconstruct and check history.

use anyhow::{Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use ks_schemas::{AuditAction, AuditRecord, NewAuditRecord, Principal};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Fields covered by `hash_self`. Everything in the record except the hash itself.
#[derive(Serialize)]
struct SealedFields<'a> {
    id: i64,
    action: AuditAction,
    principal: &'a Principal,
    reason: &'a Option<String>,
    details: &'a Option<Value>,
    created_at: DateTime<Utc>,
    hash_prev: &'a Option<String>,
}

/// Assign `id` and chain hashes to a new record.
///
/// `created_at` is truncated to microseconds so that a record read back from
/// Postgres (`timestamptz`) hashes identically to the one that was written.
pub fn seal(id: i64, new: &NewAuditRecord, hash_prev: Option<String>) -> Result<AuditRecord> {
    let mut rec = AuditRecord {
        id,
        action: new.action,
        principal: new.principal.clone(),
        reason: new.reason.clone(),
        details: new.details.clone(),
        created_at: new.created_at.trunc_subsecs(6),
        hash_prev,
        hash_self: String::new(),
    };
    rec.hash_self = compute_record_hash(&rec)?;
    Ok(rec)
}

/// SHA-256 (hex) over the canonical JSON of `rec` without `hash_self`.
pub fn compute_record_hash(rec: &AuditRecord) -> Result<String> {
    let fields = SealedFields {
        id: rec.id,
        action: rec.action,
        principal: &rec.principal,
        reason: &rec.reason,
        details: &rec.details,
        created_at: rec.created_at,
        hash_prev: &rec.hash_prev,
    };
    let canonical = canonical_json_line(&fields)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
pub fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit record failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// The entire chain is valid.
    Valid { records: usize },
    /// The chain is broken at the record with the given id.
    Broken { id: i64, reason: String },
}

impl VerifyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid { .. })
    }
}

/// Verify a full chain, genesis first (ascending id).
pub fn verify_chain(records: &[AuditRecord]) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut prev_id: Option<i64> = None;

    for rec in records {
        if let Some(p) = prev_id {
            if rec.id <= p {
                return Ok(VerifyResult::Broken {
                    id: rec.id,
                    reason: format!("id not strictly increasing: {} after {}", rec.id, p),
                });
            }
        }

        if rec.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                id: rec.id,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, rec.hash_prev
                ),
            });
        }

        let recomputed = compute_record_hash(rec)?;
        if rec.hash_self != recomputed {
            return Ok(VerifyResult::Broken {
                id: rec.id,
                reason: format!(
                    "hash_self mismatch: claimed {}, recomputed {}",
                    rec.hash_self, recomputed
                ),
            });
        }

        prev_hash = Some(rec.hash_self.clone());
        prev_id = Some(rec.id);
    }

    Ok(VerifyResult::Valid {
        records: records.len(),
    })
}

// ---------------------------------------------------------------------------
// JSONL export
// ---------------------------------------------------------------------------

/// Write `records` (ascending id) to `path` as JSON Lines, replacing any
/// existing file. Returns the number of lines written.
pub fn write_jsonl(path: impl AsRef<Path>, records: &[AuditRecord]) -> Result<usize> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create_dir_all {:?}", parent))?;
        }
    }

    let f = File::create(path).with_context(|| format!("create audit export {:?}", path))?;
    let mut w = BufWriter::new(f);
    for rec in records {
        let line = canonical_json_line(rec)?;
        w.write_all(line.as_bytes())
            .context("write audit line failed")?;
        w.write_all(b"\n").context("write newline failed")?;
    }
    w.flush().context("flush audit export failed")?;
    Ok(records.len())
}

/// Verify an exported JSONL file.
pub fn verify_jsonl(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit export {:?}", path.as_ref()))?;
    verify_jsonl_str(&content)
}

/// Same as [`verify_jsonl`] over in-memory JSONL content.
pub fn verify_jsonl_str(content: &str) -> Result<VerifyResult> {
    let mut records = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let rec: AuditRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit record at line {}", i + 1))?;
        records.push(rec);
    }
    verify_chain(&records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_record(reason: &str) -> NewAuditRecord {
        NewAuditRecord {
            action: AuditAction::Activated,
            principal: Principal::new("op-1", Some("op@example.com".to_string())),
            reason: Some(reason.to_string()),
            details: None,
            created_at: Utc.timestamp_nanos(1_700_000_000_123_456_789),
        }
    }

    #[test]
    fn seal_truncates_to_microseconds() {
        let rec = seal(1, &new_record("maintenance"), None).unwrap();
        assert_eq!(rec.created_at.timestamp_subsec_nanos() % 1_000, 0);
        assert_eq!(rec.hash_self, compute_record_hash(&rec).unwrap());
    }

    #[test]
    fn hash_depends_on_previous_link() {
        let a = seal(2, &new_record("r"), None).unwrap();
        let b = seal(2, &new_record("r"), Some("abc".to_string())).unwrap();
        assert_ne!(a.hash_self, b.hash_self);
    }

    #[test]
    fn empty_chain_is_valid() {
        assert_eq!(verify_chain(&[]).unwrap(), VerifyResult::Valid { records: 0 });
    }
}
