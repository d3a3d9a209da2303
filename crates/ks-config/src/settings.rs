//! Typed view over the merged config document.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KillSwitchConfig {
    pub operator: OperatorConfig,
    pub store: StoreConfig,
    pub daemon: DaemonConfig,
    pub identity: IdentityConfig,
    pub kill_switch: SwitchConfig,
    pub logs: LogsConfig,
}

/// The single principal allowed to toggle the switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub principal_id: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// NAME of the env var holding the Postgres URL.
    pub database_url_env: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    /// Upper bound for a single store round trip before it surfaces as unavailable.
    pub op_timeout_ms: u64,
    pub run_migrations: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url_env: "KS_DATABASE_URL".to_string(),
            max_connections: 10,
            acquire_timeout_ms: 5_000,
            op_timeout_ms: 5_000,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    pub heartbeat_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8899".to_string(),
            allowed_origins: [
                "http://localhost",
                "http://127.0.0.1",
                "http://localhost:3000",
                "http://127.0.0.1:3000",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            heartbeat_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// An upstream auth proxy authenticates the caller and injects headers.
    #[default]
    TrustedHeaders,
    /// Static bearer tokens, values resolved from env vars.
    BearerTokens,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub mode: IdentityMode,
    pub id_header: String,
    pub label_header: String,
    pub tokens: Vec<TokenEntry>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            mode: IdentityMode::TrustedHeaders,
            id_header: "x-auth-principal-id".to_string(),
            label_header: "x-auth-principal-label".to_string(),
            tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub principal_id: String,
    #[serde(default)]
    pub label: Option<String>,
    /// NAME of the env var holding the token value.
    pub token_env: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// Overrides the built-in affected-systems catalog when present.
    pub affected_systems: Option<Vec<String>>,
    pub default_deactivation_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 500,
        }
    }
}

impl KillSwitchConfig {
    /// Deserialize and validate. Fails closed when no operator is configured.
    pub fn from_json(config_json: &Value) -> Result<Self> {
        let mut cfg: KillSwitchConfig = serde_json::from_value(config_json.clone())
            .context("CONFIG_INVALID: config does not match the kill switch schema")?;
        cfg.operator.principal_id = cfg.operator.principal_id.trim().to_string();
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.operator.principal_id.is_empty() {
            bail!(
                "CONFIG_OPERATOR_MISSING: /operator/principal_id must name the single \
                 authorized operator"
            );
        }
        if self.operator.principal_id.contains('\0') {
            bail!("CONFIG_INVALID: /operator/principal_id contains a NUL character");
        }
        if let Some(reason) = &self.kill_switch.default_deactivation_reason {
            if reason.contains('\0') {
                bail!(
                    "CONFIG_INVALID: /kill_switch/default_deactivation_reason contains a NUL character"
                );
            }
        }
        if self.store.max_connections == 0 {
            bail!("CONFIG_INVALID: /store/max_connections must be >= 1");
        }
        if self.store.op_timeout_ms == 0 || self.store.acquire_timeout_ms == 0 {
            bail!("CONFIG_INVALID: store timeouts must be > 0");
        }
        if self.logs.default_limit == 0 || self.logs.max_limit < self.logs.default_limit {
            bail!(
                "CONFIG_INVALID: require 1 <= /logs/default_limit ({}) <= /logs/max_limit ({})",
                self.logs.default_limit,
                self.logs.max_limit
            );
        }
        if self.identity.mode == IdentityMode::BearerTokens && self.identity.tokens.is_empty() {
            bail!("CONFIG_INVALID: identity.mode=bearer_tokens requires /identity/tokens");
        }
        if let Some(systems) = &self.kill_switch.affected_systems {
            if systems.iter().any(|s| s.trim().is_empty()) {
                bail!("CONFIG_INVALID: /kill_switch/affected_systems contains a blank entry");
            }
        }
        Ok(())
    }
}
