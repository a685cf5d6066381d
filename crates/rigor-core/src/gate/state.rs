//! Gate states and the checked transition function.

use serde::{Deserialize, Serialize};

use super::error::{GateError, GateResult};

/// State of one submission inside the gate.
///
/// ```text
/// RECEIVED -> SCANNED -> CLEAN ---------------> EXECUTED
///                     -> NEEDS_CONFIRMATION -> EXECUTED | BLOCKED
///                     -> BLOCKED (critical)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    Received,
    Scanned,
    Clean,
    NeedsConfirmation,
    Executed,
    Blocked,
}

impl GateState {
    /// States reachable in one step.
    pub fn successors(&self) -> &'static [GateState] {
        use GateState::*;
        match self {
            Received => &[Scanned],
            Scanned => &[Clean, NeedsConfirmation, Blocked],
            Clean => &[Executed],
            NeedsConfirmation => &[Executed, Blocked],
            Executed | Blocked => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }

    /// Validate a single transition.
    pub fn advance(self, next: GateState) -> GateResult<GateState> {
        if self.successors().contains(&next) {
            Ok(next)
        } else {
            Err(GateError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GateState::Received => "RECEIVED",
            GateState::Scanned => "SCANNED",
            GateState::Clean => "CLEAN",
            GateState::NeedsConfirmation => "NEEDS_CONFIRMATION",
            GateState::Executed => "EXECUTED",
            GateState::Blocked => "BLOCKED",
        };
        f.write_str(s)
    }
}

/// Current state plus every state visited so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateMachine {
    trail: Vec<GateState>,
}

impl Default for GateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl GateMachine {
    pub fn new() -> Self {
        Self {
            trail: vec![GateState::Received],
        }
    }

    pub fn state(&self) -> GateState {
        self.trail
            .last()
            .copied()
            .unwrap_or(GateState::Received)
    }

    pub fn advance(&mut self, next: GateState) -> GateResult<GateState> {
        let next = self.state().advance(next)?;
        self.trail.push(next);
        Ok(next)
    }

    pub fn trail(&self) -> &[GateState] {
        &self.trail
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_state() -> impl Strategy<Value = GateState> {
        prop_oneof![
            Just(GateState::Received),
            Just(GateState::Scanned),
            Just(GateState::Clean),
            Just(GateState::NeedsConfirmation),
            Just(GateState::Executed),
            Just(GateState::Blocked),
        ]
    }

    #[test]
    fn test_happy_path_trail() {
        let mut m = GateMachine::new();
        m.advance(GateState::Scanned).unwrap();
        m.advance(GateState::Clean).unwrap();
        m.advance(GateState::Executed).unwrap();
        assert!(m.is_terminal());
        assert_eq!(
            m.trail(),
            &[
                GateState::Received,
                GateState::Scanned,
                GateState::Clean,
                GateState::Executed
            ]
        );
    }

    #[test]
    fn test_clean_cannot_be_blocked() {
        let mut m = GateMachine::new();
        m.advance(GateState::Scanned).unwrap();
        m.advance(GateState::Clean).unwrap();
        let err = m.advance(GateState::Blocked).unwrap_err();
        assert!(err.to_string().contains("CLEAN -> BLOCKED"));
        assert_eq!(m.state(), GateState::Clean);
    }

    #[test]
    fn test_cannot_skip_scan() {
        assert!(GateState::Received.advance(GateState::Clean).is_err());
    }

    proptest! {
        #[test]
        fn prop_terminal_states_have_no_exit(from in any_state(), to in any_state()) {
            if from.is_terminal() {
                prop_assert!(from.advance(to).is_err());
            }
        }

        #[test]
        fn prop_advance_agrees_with_successors(from in any_state(), to in any_state()) {
            prop_assert_eq!(from.advance(to).is_ok(), from.successors().contains(&to));
        }
    }
}
