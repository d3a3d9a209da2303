//! Authorization gate.
//!
//! `allowed = principal.id == operator_id`. One named operator, not a role.
//! No side effects and no failure mode: a denial is `allowed = false`, and
//! the caller turns that into `Forbidden`.

use ks_schemas::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorization {
    pub allowed: bool,
}

#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    operator_id: String,
}

impl AuthorizationGate {
    pub fn new(operator_id: impl Into<String>) -> Self {
        Self {
            operator_id: operator_id.into().trim().to_string(),
        }
    }

    pub fn operator_id(&self) -> &str {
        &self.operator_id
    }

    /// A blank operator id authorizes nobody, including a blank principal.
    pub fn authorize(&self, principal: &Principal) -> Authorization {
        let allowed = !self.operator_id.is_empty() && principal.id == self.operator_id;
        Authorization { allowed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: &str) -> Principal {
        Principal::new(id, None)
    }

    #[test]
    fn only_the_operator_is_allowed() {
        let gate = AuthorizationGate::new("op-1");
        assert!(gate.authorize(&p("op-1")).allowed);
        assert!(!gate.authorize(&p("op-2")).allowed);
        assert!(!gate.authorize(&p("OP-1")).allowed, "ids compare exactly");
        assert!(!gate.authorize(&p("op-1 ")).allowed);
    }

    #[test]
    fn label_is_not_an_identity() {
        let gate = AuthorizationGate::new("op-1");
        let impostor = Principal::new("someone-else", Some("op-1".to_string()));
        assert!(!gate.authorize(&impostor).allowed);
    }

    #[test]
    fn blank_operator_denies_everyone() {
        let gate = AuthorizationGate::new("   ");
        assert!(!gate.authorize(&p("")).allowed);
        assert!(!gate.authorize(&p("anyone")).allowed);
    }
}
