//! The two-state lock machine.
//!
//! # Invariants
//!
//! - Exactly two phases: `Disengaged` (normal operation, the provisioned
//!   default) and `Engaged` (frozen).
//! - `Activate` is valid only from `Disengaged`; `Deactivate` only from
//!   `Engaged`. A transition requested from the wrong phase is refused, never
//!   coerced into a no-op success.
//!
//! Pure logic: no IO, no clock. The service evaluates a transition against
//! the phase it read, and the store re-evaluates the same precondition
//! atomically via compare-and-set.

use ks_schemas::{AuditAction, LockState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPhase {
    Disengaged,
    Engaged,
}

impl LockPhase {
    pub fn from_engaged(engaged: bool) -> Self {
        if engaged {
            LockPhase::Engaged
        } else {
            LockPhase::Disengaged
        }
    }

    pub fn of(state: &LockState) -> Self {
        Self::from_engaged(state.engaged)
    }

    pub fn is_engaged(&self) -> bool {
        matches!(self, LockPhase::Engaged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Activate,
    Deactivate,
}

impl Transition {
    /// The only phase this transition may start from.
    pub fn from_phase(&self) -> LockPhase {
        match self {
            Transition::Activate => LockPhase::Disengaged,
            Transition::Deactivate => LockPhase::Engaged,
        }
    }

    pub fn to_phase(&self) -> LockPhase {
        match self {
            Transition::Activate => LockPhase::Engaged,
            Transition::Deactivate => LockPhase::Disengaged,
        }
    }

    pub fn audit_action(&self) -> AuditAction {
        match self {
            Transition::Activate => AuditAction::Activated,
            Transition::Deactivate => AuditAction::Deactivated,
        }
    }

    /// Conflict message when the lock is already in this transition's target phase.
    pub fn conflict_message(&self) -> &'static str {
        match self {
            Transition::Activate => "kill switch is already active",
            Transition::Deactivate => "kill switch is already inactive",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Activate => "activate",
            Transition::Deactivate => "deactivate",
        }
    }
}

/// Refusal to run `transition` from `current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrongPhase {
    pub transition: Transition,
    pub current: LockPhase,
}

/// Evaluate `transition` against `current`, returning the target phase.
pub fn evaluate(current: LockPhase, transition: Transition) -> Result<LockPhase, WrongPhase> {
    if current == transition.from_phase() {
        Ok(transition.to_phase())
    } else {
        Err(WrongPhase {
            transition,
            current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_only_from_disengaged() {
        assert_eq!(
            evaluate(LockPhase::Disengaged, Transition::Activate),
            Ok(LockPhase::Engaged)
        );
        assert!(evaluate(LockPhase::Engaged, Transition::Activate).is_err());
    }

    #[test]
    fn deactivate_only_from_engaged() {
        assert_eq!(
            evaluate(LockPhase::Engaged, Transition::Deactivate),
            Ok(LockPhase::Disengaged)
        );
        let refused = evaluate(LockPhase::Disengaged, Transition::Deactivate).unwrap_err();
        assert_eq!(refused.current, LockPhase::Disengaged);
        assert_eq!(
            refused.transition.conflict_message(),
            "kill switch is already inactive"
        );
    }

    #[test]
    fn transitions_map_to_audit_actions() {
        assert_eq!(Transition::Activate.audit_action(), AuditAction::Activated);
        assert_eq!(
            Transition::Deactivate.audit_action(),
            AuditAction::Deactivated
        );
    }
}
