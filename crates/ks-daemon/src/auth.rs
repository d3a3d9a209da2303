//! Request identity.
//!
//! Authentication happens upstream of the kill switch. A resolver only turns
//! what the upstream layer left on the request into a [`Principal`]; anything
//! missing or unrecognised is `Unauthenticated`. Authorization (is this the
//! operator?) stays in `KillSwitchService`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderName};
use ks_config::{IdentityConfig, IdentityMode, ResolvedSecrets, ResolvedToken};
use ks_schemas::Principal;
use ks_switch::KillSwitchError;
use sha2::{Digest, Sha256};

pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Result<Principal, KillSwitchError>;
}

/// Build the resolver selected by `identity.mode`.
pub fn resolver_from_config(
    cfg: &IdentityConfig,
    secrets: &ResolvedSecrets,
) -> Result<Arc<dyn IdentityResolver>> {
    match cfg.mode {
        IdentityMode::TrustedHeaders => Ok(Arc::new(TrustedHeaderResolver::new(
            &cfg.id_header,
            &cfg.label_header,
        )?)),
        IdentityMode::BearerTokens => {
            if secrets.identity_tokens.is_empty() {
                bail!("identity.mode=bearer_tokens but no tokens were resolved");
            }
            Ok(Arc::new(BearerTokenResolver::new(&secrets.identity_tokens)))
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Trusted headers
// ---------------------------------------------------------------------------

/// Reads the principal from headers set by a trusted authenticating proxy.
///
/// Only safe when the daemon is reachable exclusively through that proxy.
#[derive(Debug, Clone)]
pub struct TrustedHeaderResolver {
    id_header: HeaderName,
    label_header: HeaderName,
}

impl TrustedHeaderResolver {
    pub fn new(id_header: &str, label_header: &str) -> Result<Self> {
        let id_header = HeaderName::from_bytes(id_header.trim().to_ascii_lowercase().as_bytes())
            .with_context(|| format!("invalid identity.id_header: {id_header:?}"))?;
        let label_header =
            HeaderName::from_bytes(label_header.trim().to_ascii_lowercase().as_bytes())
                .with_context(|| format!("invalid identity.label_header: {label_header:?}"))?;
        Ok(Self {
            id_header,
            label_header,
        })
    }
}

impl IdentityResolver for TrustedHeaderResolver {
    fn resolve(&self, headers: &HeaderMap) -> Result<Principal, KillSwitchError> {
        let id = header_str(headers, &self.id_header).ok_or(KillSwitchError::Unauthenticated)?;
        let label = header_str(headers, &self.label_header).map(str::to_string);
        Ok(Principal::new(id, label))
    }
}

// ---------------------------------------------------------------------------
// Bearer tokens
// ---------------------------------------------------------------------------

/// Maps `Authorization: Bearer <token>` to a principal.
///
/// Only SHA-256 digests of the tokens are kept in memory.
#[derive(Clone)]
pub struct BearerTokenResolver {
    by_digest: HashMap<String, Principal>,
}

impl std::fmt::Debug for BearerTokenResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenResolver")
            .field("principals", &self.by_digest.len())
            .finish()
    }
}

impl BearerTokenResolver {
    pub fn new(tokens: &[ResolvedToken]) -> Self {
        let by_digest = tokens
            .iter()
            .map(|t| {
                (
                    token_digest(&t.token),
                    Principal::new(t.principal_id.clone(), t.label.clone()),
                )
            })
            .collect();
        Self { by_digest }
    }
}

pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl IdentityResolver for BearerTokenResolver {
    fn resolve(&self, headers: &HeaderMap) -> Result<Principal, KillSwitchError> {
        let raw = header_str(headers, &AUTHORIZATION).ok_or(KillSwitchError::Unauthenticated)?;
        let token = raw
            .strip_prefix("Bearer ")
            .or_else(|| raw.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(KillSwitchError::Unauthenticated)?;

        self.by_digest
            .get(&token_digest(token))
            .cloned()
            .ok_or(KillSwitchError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(*k, HeaderValue::from_static(v));
        }
        h
    }

    #[test]
    fn trusted_headers_resolve_id_and_optional_label() {
        let r = TrustedHeaderResolver::new("X-Auth-Principal-Id", "x-auth-principal-label")
            .unwrap();

        let p = r
            .resolve(&headers(&[
                ("x-auth-principal-id", " op-1 "),
                ("x-auth-principal-label", "op@example.com"),
            ]))
            .unwrap();
        assert_eq!(p.id, "op-1");
        assert_eq!(p.label.as_deref(), Some("op@example.com"));

        let p = r.resolve(&headers(&[("x-auth-principal-id", "op-1")])).unwrap();
        assert!(p.label.is_none());

        let err = r.resolve(&headers(&[("x-auth-principal-id", "   ")])).unwrap_err();
        assert!(matches!(err, KillSwitchError::Unauthenticated));
        let err = r.resolve(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, KillSwitchError::Unauthenticated));
    }

    #[test]
    fn bearer_tokens_match_by_digest_only() {
        let r = BearerTokenResolver::new(&[ResolvedToken {
            principal_id: "op-1".to_string(),
            label: Some("op@example.com".to_string()),
            token: "s3cret-token".to_string(),
        }]);

        let p = r
            .resolve(&headers(&[("authorization", "Bearer s3cret-token")]))
            .unwrap();
        assert_eq!(p.id, "op-1");

        for bad in ["Bearer wrong", "s3cret-token", "Basic s3cret-token", "Bearer "] {
            let mut h = HeaderMap::new();
            h.insert(AUTHORIZATION, HeaderValue::from_str(bad).unwrap());
            assert!(
                matches!(r.resolve(&h), Err(KillSwitchError::Unauthenticated)),
                "{bad:?} must not authenticate"
            );
        }

        assert!(!format!("{r:?}").contains("s3cret"));
    }
}
