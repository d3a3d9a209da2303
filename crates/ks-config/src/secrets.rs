//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"KS_DATABASE_URL"`).
//! - Binaries call [`resolve_secrets`] once at startup and pass the result
//!   into constructors; nothing else reads these env vars.
//! - `Debug` impls redact values; errors name the env var, never the value.

use anyhow::{bail, Result};

use crate::settings::{IdentityMode, KillSwitchConfig};

/// A bearer token bound to the principal it authenticates.
#[derive(Clone)]
pub struct ResolvedToken {
    pub principal_id: String,
    pub label: Option<String>,
    pub token: String,
}

impl std::fmt::Debug for ResolvedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedToken")
            .field("principal_id", &self.principal_id)
            .field("label", &self.label)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

/// All runtime-resolved secrets for one process.
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// `None` if the named env var was absent or blank.
    pub database_url: Option<String>,
    database_url_env: String,
    pub identity_tokens: Vec<ResolvedToken>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .field("database_url_env", &self.database_url_env)
            .field("identity_tokens", &self.identity_tokens)
            .finish()
    }
}

impl ResolvedSecrets {
    /// The database URL, or an error naming the env var that should hold it.
    pub fn require_database_url(&self) -> Result<&str> {
        match self.database_url.as_deref() {
            Some(url) => Ok(url),
            None => bail!(
                "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
                self.database_url_env
            ),
        }
    }
}

/// Resolve a named environment variable; blank counts as unset.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve every secret the config names.
///
/// The database URL stays optional here; store-backed callers enforce it via
/// [`ResolvedSecrets::require_database_url`]. In `bearer_tokens` identity mode
/// every configured token must resolve, otherwise the caller would boot with
/// an identity table that silently denies someone.
pub fn resolve_secrets(cfg: &KillSwitchConfig) -> Result<ResolvedSecrets> {
    let database_url = resolve_env(&cfg.store.database_url_env);

    let mut identity_tokens = Vec::new();
    if cfg.identity.mode == IdentityMode::BearerTokens {
        for entry in &cfg.identity.tokens {
            let Some(token) = resolve_env(&entry.token_env) else {
                bail!(
                    "SECRETS_MISSING: required env var '{}' (bearer token for principal '{}') \
                     is not set or empty",
                    entry.token_env,
                    entry.principal_id,
                );
            };
            identity_tokens.push(ResolvedToken {
                principal_id: entry.principal_id.clone(),
                label: entry.label.clone(),
                token: token.trim().to_string(),
            });
        }
    }

    Ok(ResolvedSecrets {
        database_url,
        database_url_env: cfg.store.database_url_env.clone(),
        identity_tokens,
    })
}
