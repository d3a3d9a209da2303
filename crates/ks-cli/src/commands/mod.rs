//! Command handlers for ks-cli.
//!
//! Shared plumbing (config, store, service wiring) lives here.
//! Command-specific logic lives in the submodules.

pub mod audit;
pub mod switch;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use ks_config::{Consumer, KillSwitchConfig, UnusedKeyPolicy};
use ks_db::PgLockStore;
use ks_schemas::Principal;
use ks_switch::{AffectedSystems, AuthorizationGate, KillSwitchService, LogLimits};
use serde_json::{json, Value};
use tracing::debug;

/// Where the command reads its configuration from.
pub struct Context {
    config_paths: Vec<String>,
}

impl Context {
    /// Explicit `--config` paths win; otherwise `KS_CONFIG` / the default path.
    pub fn new(config_paths: Vec<String>) -> Self {
        let config_paths = if config_paths.is_empty() {
            ks_config::config_paths_from_env()
        } else {
            config_paths
        };
        Self { config_paths }
    }

    pub fn settings(&self) -> Result<KillSwitchConfig> {
        let refs: Vec<&str> = self.config_paths.iter().map(String::as_str).collect();
        let loaded = ks_config::load_layered_yaml(&refs)?;
        let report =
            ks_config::report_unused_keys(Consumer::Cli, &loaded.config_json, UnusedKeyPolicy::Warn)?;
        debug!(
            config_hash = %loaded.config_hash,
            unused = ?report.unused_leaf_pointers,
            "config loaded"
        );
        loaded.settings()
    }

    pub async fn store(&self, cfg: &KillSwitchConfig) -> Result<Arc<PgLockStore>> {
        let secrets = ks_config::resolve_secrets(cfg)?;
        let pool = ks_db::connect(
            secrets.require_database_url()?,
            ks_db::ConnectOptions {
                max_connections: cfg.store.max_connections,
                acquire_timeout: Duration::from_millis(cfg.store.acquire_timeout_ms),
            },
        )
        .await?;

        let st = ks_db::status(&pool).await?;
        if !st.is_migrated() {
            bail!("kill switch tables are missing; run `ks db migrate` first");
        }

        Ok(Arc::new(PgLockStore::new(
            pool,
            Duration::from_millis(cfg.store.op_timeout_ms),
        )))
    }

    pub async fn service(&self) -> Result<(KillSwitchService, KillSwitchConfig)> {
        let cfg = self.settings()?;
        let store = self.store(&cfg).await?;
        Ok((build_service(&cfg, store), cfg))
    }
}

pub fn build_service(cfg: &KillSwitchConfig, store: Arc<PgLockStore>) -> KillSwitchService {
    let mut service =
        KillSwitchService::new(store, AuthorizationGate::new(&cfg.operator.principal_id))
            .with_log_limits(LogLimits {
                default_limit: cfg.logs.default_limit,
                max_limit: cfg.logs.max_limit,
            });
    if let Some(names) = &cfg.kill_switch.affected_systems {
        service = service.with_catalog(AffectedSystems::new(names.clone()));
    }
    if let Some(reason) = &cfg.kill_switch.default_deactivation_reason {
        service = service.with_deactivation_reason(reason.clone());
    }
    service
}

/// The caller as recorded. `--label` wins; the operator falls back to
/// `operator.label` from config.
pub fn principal_for(
    cfg: &KillSwitchConfig,
    principal_id: &str,
    label: Option<String>,
) -> Principal {
    let principal_id = principal_id.trim();
    let label = label
        .filter(|l| !l.trim().is_empty())
        .or_else(|| {
            (principal_id == cfg.operator.principal_id)
                .then(|| cfg.operator.label.clone())
                .flatten()
        });
    Principal::new(principal_id, label)
}

/// Load audit details from either an inline JSON string or a file path.
pub fn load_details(details: Option<String>, details_file: Option<String>) -> Result<Option<Value>> {
    if let Some(p) = details_file {
        // Read raw bytes to handle a UTF-8 BOM cleanly.
        let bytes = fs::read(&p).with_context(|| format!("read details-file failed: {}", p))?;
        let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
        let raw = String::from_utf8(bytes.to_vec()).context("details-file must be UTF-8 text")?;
        let v: Value =
            serde_json::from_str(raw.trim()).context("details-file must contain valid JSON")?;
        return Ok(Some(v));
    }

    match details {
        Some(raw) => {
            let v: Value =
                serde_json::from_str(raw.trim()).context("--details must be valid JSON")?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

/// Details attached to every transition made from the CLI.
pub fn transport_details() -> Value {
    json!({
        "via": "cli",
        "host": host_fingerprint(),
    })
}

/// Stable-ish, non-sensitive host fingerprint for attribution.
/// This is *not* a hardware id; it only distinguishes machines in the trail.
pub fn host_fingerprint() -> String {
    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "UNKNOWN_HOST".to_string());
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "UNKNOWN_USER".to_string());
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    format!("{hostname}|{username}|{os}|{arch}")
}

pub fn opt_dt(dt: &Option<chrono::DateTime<chrono::Utc>>) -> String {
    dt.as_ref().map(|d| d.to_rfc3339()).unwrap_or_default()
}
