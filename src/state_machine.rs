//! State machine trait shared by the trip and issue lifecycles
//!
//! Both lifecycles are small closed graphs over enum states. The trait
//! captures the shape every status enum must provide: a stable name, a
//! terminal flag and the set of valid outgoing edges. Transition *attempts*
//! are validated here; role gating and side effects belong to the owning
//! aggregate.

use crate::errors::{DispatchError, DispatchResult};
use std::fmt::Debug;

/// Trait for types that act as states in a lifecycle graph
pub trait State: Debug + Clone + Copy + PartialEq + Eq + Send + Sync {
    /// Stable name of this state for logging and error messages
    fn name(&self) -> &'static str;

    /// Whether this state has no outgoing edges
    fn is_terminal(&self) -> bool {
        false
    }

    /// All valid target states from this state
    fn valid_transitions(&self) -> Vec<Self>;

    /// Check if a transition to the target state is valid
    fn can_transition_to(&self, target: &Self) -> bool {
        !self.is_terminal() && self.valid_transitions().contains(target)
    }
}

/// Validate an edge, producing the typed rejection callers report upstream
///
/// Terminal states reject every edge; non-terminal states reject edges not
/// in their transition table.
pub fn guard_transition<S: State>(from: S, to: S) -> DispatchResult<()> {
    if from.can_transition_to(&to) {
        Ok(())
    } else {
        Err(DispatchError::InvalidTransition {
            from: from.name().to_string(),
            to: to.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
        Off,
    }

    impl State for Light {
        fn name(&self) -> &'static str {
            match self {
                Light::Red => "Red",
                Light::Green => "Green",
                Light::Off => "Off",
            }
        }

        fn is_terminal(&self) -> bool {
            matches!(self, Light::Off)
        }

        fn valid_transitions(&self) -> Vec<Self> {
            match self {
                Light::Red => vec![Light::Green, Light::Off],
                Light::Green => vec![Light::Red, Light::Off],
                Light::Off => vec![],
            }
        }
    }

    #[test]
    fn guard_accepts_listed_edges() {
        assert!(guard_transition(Light::Red, Light::Green).is_ok());
        assert!(guard_transition(Light::Green, Light::Off).is_ok());
    }

    #[test]
    fn guard_rejects_unlisted_edges() {
        let err = guard_transition(Light::Red, Light::Red).unwrap_err();
        assert_eq!(
            err,
            DispatchError::InvalidTransition {
                from: "Red".to_string(),
                to: "Red".to_string(),
            }
        );
    }

    #[test]
    fn terminal_states_reject_everything() {
        assert!(!Light::Off.can_transition_to(&Light::Red));
        assert!(guard_transition(Light::Off, Light::Green).is_err());
    }
}
